pub mod outbox;

pub use outbox::{enqueue_event, start_outbox_relay};
