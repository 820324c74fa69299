pub mod backend;
pub mod cache;
pub mod database;
pub mod feedback;
pub mod realtime;
pub mod storage;
