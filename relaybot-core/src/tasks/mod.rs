pub mod maintenance;

pub use maintenance::spawn_maintenance_task;
