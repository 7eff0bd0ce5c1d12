//! Concrete back-end drivers (component D) plus the boxed handle type the
//! registry hands back to `main`.
pub mod debug_bridge_ip;
pub mod fifo;
pub mod serdes;
pub mod tmem;

/// A fully constructed driver, type-erased behind the `XvcServer` trait so
/// the registry can return one regardless of which backend built it. `Send`
/// so `main` can hand the server off to a background thread and still poll
/// for a shutdown signal on the thread it started on.
pub type JtagDriverHandle = Box<dyn xvc_server::XvcServer + Send>;
