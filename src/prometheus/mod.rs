pub mod collector;
pub mod counter;
pub mod desc;
pub mod gauge;
pub mod histogram;
pub mod labelset;
pub mod promslog;
pub mod push;
pub mod registry;
pub mod text_create;
