pub mod messages;
pub mod people;
pub mod presence;
pub mod relay;
