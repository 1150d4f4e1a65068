pub mod common;

mod post_tests;
mod snapshot_tests;
