pub mod handlers;
pub mod traits;

pub use handlers::{ChannelPublisher, PollEvent, PublisherControl};
pub use traits::{LoggingPublisher, NoOpPublisher, Publisher, Transport};
