//! Synthetic demo topics
//!
//! Publishes a handful of sensor-like topics into a [`MemorySource`] so the
//! hub can be tried without a real robot.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::MemorySource;
use crate::codec::{FieldValue, Message, Time};

const IMU_RATE_HZ: f64 = 100.0;

fn header(frame_id: &str) -> Message {
    Message::new("std_msgs/msg/Header")
        .with("stamp", Time::now())
        .with("frame_id", frame_id)
}

fn vector3(x: f64, y: f64, z: f64) -> Message {
    Message::new("geometry_msgs/msg/Vector3")
        .with("x", x)
        .with("y", y)
        .with("z", z)
}

fn imu(t: f64) -> Message {
    let yaw = t * 0.5;
    let covariance = || FieldValue::Array(vec![FieldValue::Float(0.0); 9]);
    Message::new("sensor_msgs/msg/Imu")
        .with("header", header("imu_link"))
        .with(
            "orientation",
            Message::new("geometry_msgs/msg/Quaternion")
                .with("x", 0.0)
                .with("y", 0.0)
                .with("z", (yaw / 2.0).sin())
                .with("w", (yaw / 2.0).cos()),
        )
        .with("orientation_covariance", covariance())
        .with("angular_velocity", vector3(0.0, 0.0, 0.5))
        .with("angular_velocity_covariance", covariance())
        .with("linear_acceleration", vector3(t.sin(), t.cos(), 9.81))
        .with("linear_acceleration_covariance", covariance())
}

fn scan(t: f64) -> Message {
    let ranges = (0..360)
        .map(|i| {
            let angle = (i as f64).to_radians();
            FieldValue::Float((2.0 + 0.5 * (angle * 3.0 + t).sin()) as f32 as f64)
        })
        .collect::<Vec<_>>();
    Message::new("sensor_msgs/msg/LaserScan")
        .with("header", header("laser"))
        .with("angle_min", 0.0)
        .with("angle_max", std::f32::consts::TAU as f64)
        .with("angle_increment", (1.0f32).to_radians() as f64)
        .with("time_increment", 0.0)
        .with("scan_time", 0.1)
        .with("range_min", 0.1)
        .with("range_max", 10.0)
        .with("ranges", FieldValue::Array(ranges))
        .with("intensities", FieldValue::Array(Vec::new()))
}

/// Register the demo topics and start publishing them
///
/// `/imu` runs at 100 Hz, `/scan` at 10 Hz and `/chatter` at 1 Hz.
pub fn spawn_demo_publisher(source: Arc<MemorySource>) -> JoinHandle<()> {
    tokio::spawn(async move {
        source.add_topic("/imu", "sensor_msgs/msg/Imu").await;
        source.add_topic("/scan", "sensor_msgs/msg/LaserScan").await;
        source.add_topic("/chatter", "std_msgs/msg/String").await;

        let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / IMU_RATE_HZ));
        let mut tick: u64 = 0;
        loop {
            interval.tick().await;
            let t = tick as f64 / IMU_RATE_HZ;

            source.push("/imu", imu(t)).await;
            if tick % 10 == 0 {
                source.push("/scan", scan(t)).await;
            }
            if tick % 100 == 0 {
                let text = format!("hello world {}", tick / 100);
                source
                    .push("/chatter", Message::new("std_msgs/msg/String").with("data", text))
                    .await;
            }
            tick = tick.wrapping_add(1);
        }
    })
}
