pub mod keepalive;
pub mod watchdog;
