pub mod inspect;
pub mod optimize;
pub mod prepare;
pub mod stats;
pub mod train_final;
