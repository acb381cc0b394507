pub mod pii;
pub mod text;

pub use pii::Masked;
pub use text::truncate_message;
