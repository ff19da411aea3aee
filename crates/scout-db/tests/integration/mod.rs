mod common;
mod content_tests;
mod login_tests;
mod openreview_tests;
mod task_tests;
