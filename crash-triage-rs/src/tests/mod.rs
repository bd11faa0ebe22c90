//! Cross-module tests for the crash-triage pipeline

pub mod github_mock_tests;
