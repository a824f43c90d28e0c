mod common;

mod build_file_tests;
mod orchestrate_tests;
