pub mod normalize;
pub mod sync;
pub mod token_store;
pub mod whoop_client;
