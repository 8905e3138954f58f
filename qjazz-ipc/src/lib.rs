pub mod frame;
pub mod messages;
pub mod rendezvous;
pub mod sync_frame;

pub use frame::{read_message, write_message, FrameError};
pub use messages::{Envelope, Message, MsgId};
pub use rendezvous::{create_fifo, RendezVousReader, RendezVousStatus, RendezVousWriter};
pub use sync_frame::{read_message_sync, write_message_sync};
