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

use core::fmt;

/// `EINVAL`, as reported to the boot sequence.
pub const EINVAL: i32 = 22;

/// Structural errors that abort the walk over the boot information block.
///
/// Any field of the output populated before the error was detected stays valid, but the
/// output as a whole may be incomplete.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FormatError {
    /// The buffer can't even hold the 8-byte information header.
    StreamTooShort { len: usize },
    /// The header claims more bytes than the buffer provides.
    TotalSizeExceedsBuffer { total_size: u32, available: usize },
    /// A tag declared a size of zero.
    ZeroSizeTag { offset: usize },
    /// A tag header, or the payload it declares, runs past the end of the block.
    TruncatedTag { offset: usize },
    /// The declared size doesn't cover the fixed part of a recognized tag.
    TagTooSmall { typ: u32, size: u32, min: usize },
    /// Tag type beyond the highest id assigned by the boot protocol.
    UnknownTagType { typ: u32 },
    /// The EFI memory map lives above 4GiB.
    EfiMemoryMapAbove4G { address: u64 },
}

impl FormatError {
    /// Returns the negative status code reported to the boot sequence.
    pub const fn code(&self) -> i32 {
        -EINVAL
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::StreamTooShort { len } => {
                write!(f, "boot information block too short: {len} bytes")
            }
            FormatError::TotalSizeExceedsBuffer { total_size, available } => write!(
                f,
                "boot information total size {total_size} exceeds the {available} available bytes"
            ),
            FormatError::ZeroSizeTag { offset } => {
                write!(f, "the multiboot2 tag size should not be 0 (offset {offset:#x})")
            }
            FormatError::TruncatedTag { offset } => {
                write!(f, "multiboot2 tag at offset {offset:#x} runs past the end of the block")
            }
            FormatError::TagTooSmall { typ, size, min } => {
                write!(f, "multiboot2 tag type {typ} has size {size}, expected at least {min}")
            }
            FormatError::UnknownTagType { typ } => write!(f, "unknown multiboot2 tag type: {typ}"),
            FormatError::EfiMemoryMapAbove4G { address } => {
                write!(f, "the efi mmap address should be less than 4G: {address:#x}")
            }
        }
    }
}

impl core::error::Error for FormatError {}

/// Maps the result of a walk to the status code expected by the boot sequence: 0 on
/// success (including success with warnings), a negative errno otherwise.
pub fn status_code<T>(result: &Result<T, FormatError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(err) => err.code(),
    }
}
