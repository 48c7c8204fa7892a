pub mod db;
pub mod import;
pub mod memory;

pub use db::DbAdapter;
pub use import::{import_cards, load_cards_file};
pub use memory::MemoryStore;
