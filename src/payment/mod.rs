pub mod poster;
pub mod returns;

pub use poster::{post, post_reversal, PostContext};
pub use returns::{process, ReturnFileReport};
