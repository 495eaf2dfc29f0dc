pub mod health_monitor;
