//
// Copyright 2022 The Project Oak Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Converts the multiboot2 boot information block handed over by the bootloader into a
//! fixed-size [`NormalizedBootInfo`] for early initialization.
//!
//! The conversion runs once, in a single pass, without allocating. Malformed blocks are
//! reported as a [`FormatError`]; recoverable problems (too many memory map entries or
//! modules, tags we don't use) are logged and skipped.

#![cfg_attr(not(test), no_std)]

#[cfg(any(test, feature = "builder"))]
extern crate alloc;

#[cfg(any(test, feature = "builder"))]
pub mod builder;
pub mod error;
pub mod handlers;
pub mod info;
pub mod tag;
pub mod walker;

pub use error::{status_code, FormatError};
pub use info::{
    E820Entry, E820EntryType, EfiInfo, EfiSources, InfoFlags, ModuleEntry, NormalizedBootInfo,
    E820_MAX_ENTRIES, EFI64_LOADER_SIGNATURE, MAX_MODULE_COUNT,
};
pub use tag::{TagStream, TagType};
pub use walker::{convert, convert_from_ptr, TagWalker, Termination, WalkSummary};
