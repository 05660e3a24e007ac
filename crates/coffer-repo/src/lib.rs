//! Coffer Object Store
//!
//! This crate implements a content-addressed, deduplicating object store on
//! top of opaque blob storage - the storage engine of a backup repository.
//!
//! ## What does it do?
//!
//! Logical objects of arbitrary size are broken into chunks, each chunk is
//! hashed and optionally encrypted with a key derived from its own hash, and
//! chunks land in the underlying blob store. An object's identifier *is* the
//! cryptographic fingerprint of its content:
//!
//! 1. **Splitting**: fixed-size or content-defined (rolling hash) boundaries
//! 2. **Dedupe**: a chunk already present in storage is never re-uploaded
//! 3. **Packing**: many small objects coalesce into a single pack blob
//! 4. **Indirection**: large objects become a list of chunk references,
//!    itself stored as an object
//! 5. **Verification**: every read re-derives the content hash and compares
//!    it to the block name
//!
//! ## Architecture overview
//!
//! ```text
//! ┌──────────────┐   write()   ┌──────────────┐
//! │ ObjectWriter ├────────────▶│   Splitter   │
//! └──────────────┘             └──────┬───────┘
//!                                     │ chunk
//!                                     ▼
//!                       hash ─ dedupe ─ pack ─ encrypt
//!                                     │
//!                                     ▼
//!                            ┌─────────────────┐
//!                            │  blob storage   │  (object_store)
//!                            └────────┬────────┘
//!                                     │
//!                                     ▼
//! ┌──────────────┐    open()  ┌──────────────┐
//! │ ObjectReader │◀───────────┤ObjectManager │
//! └──────────────┘            └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use coffer_repo::{initialize, open_repository, NewRepositoryOptions, Options};
//! use coffer_repo::credentials::Password;
//! use coffer_repo::writer::WriterOptions;
//! use object_store::memory::InMemory;
//!
//! let storage = Arc::new(InMemory::new());
//! let creds = Password::new("correct horse battery staple");
//!
//! initialize(storage.clone(), &NewRepositoryOptions::default(), &creds).await?;
//! let repo = open_repository(storage, &creds, Options::default()).await?;
//!
//! let mut writer = repo.objects.new_writer(WriterOptions::default());
//! writer.write(b"hello repository").await?;
//! let id = writer.result().await?;
//!
//! let mut reader = repo.objects.open(&id).await?;
//! let contents = reader.read_to_end().await?;
//! repo.close().await?;
//! ```

pub mod blob;
pub mod block_cache;
pub mod credentials;
pub mod error;
mod formatter;
pub mod initialize;
pub mod manager;
pub mod metadata;
mod pack;
pub mod reader;
mod splitter;
pub mod stats;
pub mod writer;

pub use coffer_core::{IndirectEntry, MetadataFormat, ObjectId, RepositoryObjectFormat};

pub use blob::BlobStore;
pub use credentials::{Credentials, MasterKey, Password};
pub use error::{Error, Result};
pub use initialize::{initialize, open_repository, NewRepositoryOptions, Repository};
pub use manager::{ObjectManager, Options};
pub use reader::ObjectReader;
pub use stats::StatsSnapshot;
pub use writer::{ObjectWriter, WriterOptions};
