//! Concrete pipeline stages

mod dkim_sign;
mod dkim_verify;
mod hole;
mod logger;
mod saver;
mod sender;

pub use dkim_sign::DkimSign;
pub use dkim_verify::DkimVerify;
pub use hole::Hole;
pub use logger::Logger;
pub use saver::Saver;
pub use sender::Sender;
