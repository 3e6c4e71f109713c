mod orchestrator_tests;
mod process_runtime_tests;
