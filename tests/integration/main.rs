//! Integration tests against a mock identity provider.

mod end_to_end;
mod support;
