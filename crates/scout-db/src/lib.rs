pub mod config;
pub mod content_repository;
pub mod database;
pub mod login_repository;
pub mod openreview_repository;
pub mod task_repository;

pub use config::DatabaseConfig;
pub use content_repository::ContentRepository;
pub use database::Database;
pub use login_repository::LoginRepository;
pub use openreview_repository::OpenReviewRepository;
pub use task_repository::TaskRepository;
