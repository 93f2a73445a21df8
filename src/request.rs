//! Job requests are read from JSON files and/or assembled from CLI flags

/// Unvalidated job request structs, deserialised from JSON
pub mod job;
/// Read a job request file and validate it against the schema
pub mod message;
/// Compile the embedded job request JSON schema
pub mod schema;
