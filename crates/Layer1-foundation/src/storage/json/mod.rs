//! 파일 기반 설정 저장소

mod store;

pub use store::{read_file, JsonStore, APP_DIR};
