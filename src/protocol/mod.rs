//! Wire protocol of the broker
//!
//! Two independent grammars share TCP as transport:
//!
//! - **frame**: control-byte delimited messages sent by monitors
//!   (one exchange per connection)
//! - **command**: newline delimited commands sent by clients
//!   (persistent session)
//!
//! Both are answered with the same **response** format. The **codec** module
//! frames all three on a byte stream.

pub mod codec;
pub mod command;
pub mod frame;
pub mod response;

pub use codec::{CommandCodec, MonitorCodec, ResponseCodec};
pub use command::{Command, Target};
pub use frame::MonitorHeader;
pub use response::{Response, ResponseCode};
