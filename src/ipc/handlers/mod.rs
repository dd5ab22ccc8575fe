pub mod attendance;
pub mod comments;
pub mod core;
pub mod curriculum;
pub mod dashboards;
pub mod exams;
pub mod materials;
pub mod questions;
pub mod stats;
pub mod users;
