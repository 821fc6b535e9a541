//! Integration tests: full bot runs against a scripted executor.

mod lifecycle;
mod mock_executor;
