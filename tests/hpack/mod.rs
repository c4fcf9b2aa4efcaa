//! HPACK wrapper tests
