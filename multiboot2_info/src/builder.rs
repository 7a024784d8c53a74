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

//! Encoder for boot information blocks, for host-side tooling and tests.
//!
//! The builder lays out tags exactly like a multiboot2 loader would, but doesn't stop
//! you from producing malformed blocks.

use alloc::vec::Vec;
use core::{ffi::CStr, mem::size_of};

use zerocopy::IntoBytes;

use crate::tag::{
    EfiMmapTagHeader, InfoHeader, MmapEntry, MmapTagHeader, ModuleTagHeader, TagHeader, TagType,
    INFO_HEADER_SIZE, TAG_ALIGN,
};

#[derive(Clone, Debug)]
pub struct TagStreamBuilder {
    buf: Vec<u8>,
}

impl TagStreamBuilder {
    pub fn new() -> Self {
        Self { buf: alloc::vec![0; INFO_HEADER_SIZE] }
    }

    pub fn mmap(self, entries: &[MmapEntry]) -> Self {
        let size = size_of::<MmapTagHeader>() + entries.len() * size_of::<MmapEntry>();
        let header = MmapTagHeader {
            header: tag_header(TagType::Mmap as u32, size),
            entry_size: size_of::<MmapEntry>() as u32,
            entry_version: 0,
        };
        self.push(&[header.as_bytes(), entries.as_bytes()])
    }

    pub fn module(self, mod_start: u32, mod_end: u32, cmdline: &CStr) -> Self {
        let cmdline = cmdline.to_bytes_with_nul();
        let header = ModuleTagHeader {
            header: tag_header(
                TagType::Module as u32,
                size_of::<ModuleTagHeader>() + cmdline.len(),
            ),
            mod_start,
            mod_end,
        };
        self.push(&[header.as_bytes(), cmdline])
    }

    pub fn boot_loader_name(self, name: &CStr) -> Self {
        self.raw_tag(TagType::BootLoaderName as u32, name.to_bytes_with_nul())
    }

    pub fn acpi_new(self, rsdp: &[u8]) -> Self {
        self.raw_tag(TagType::AcpiNew as u32, rsdp)
    }

    pub fn efi64(self, pointer: u64) -> Self {
        self.raw_tag(TagType::Efi64 as u32, &pointer.to_le_bytes())
    }

    pub fn efi_mmap(self, descr_size: u32, descr_vers: u32, map: &[u8]) -> Self {
        let header = EfiMmapTagHeader {
            header: tag_header(TagType::EfiMmap as u32, size_of::<EfiMmapTagHeader>() + map.len()),
            descr_size,
            descr_vers,
        };
        self.push(&[header.as_bytes(), map])
    }

    /// Appends a tag of arbitrary type with a correct size.
    pub fn raw_tag(self, typ: u32, payload: &[u8]) -> Self {
        let header = tag_header(typ, size_of::<TagHeader>() + payload.len());
        self.push(&[header.as_bytes(), payload])
    }

    /// Appends a bare tag header claiming `size` bytes, without any payload.
    pub fn raw_header(self, typ: u32, size: u32) -> Self {
        let header = TagHeader { typ, size };
        self.push(&[header.as_bytes()])
    }

    pub fn end(self) -> Self {
        self.raw_tag(TagType::End as u32, &[])
    }

    /// Returns the encoded block, with `total_size` filled in.
    pub fn build(mut self) -> Vec<u8> {
        let header = InfoHeader { total_size: self.buf.len() as u32, reserved: 0 };
        self.buf[..INFO_HEADER_SIZE].copy_from_slice(header.as_bytes());
        self.buf
    }

    fn push(mut self, parts: &[&[u8]]) -> Self {
        for part in parts {
            self.buf.extend_from_slice(part);
        }
        let padded = self.buf.len().next_multiple_of(TAG_ALIGN);
        self.buf.resize(padded, 0);
        self
    }
}

impl Default for TagStreamBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn tag_header(typ: u32, size: usize) -> TagHeader {
    TagHeader { typ, size: size as u32 }
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    #[googletest::test]
    fn minimal_stream_layout() {
        let entry = MmapEntry { addr: 0x100000, len: 0x1000, typ: 1, reserved: 0 };
        let bytes = TagStreamBuilder::new().mmap(&[entry]).end().build();

        let mut expected = Vec::new();
        expected.extend_from_slice(&56u32.to_le_bytes());
        expected.extend_from_slice(&0u32.to_le_bytes());
        // The memory map tag is its 16-byte fixed part plus one 24-byte entry.
        for word in [6u32, 40, 24, 0] {
            expected.extend_from_slice(&word.to_le_bytes());
        }
        expected.extend_from_slice(entry.as_bytes());
        expected.extend_from_slice(&0u32.to_le_bytes());
        expected.extend_from_slice(&8u32.to_le_bytes());

        assert_eq!(bytes, expected);
    }

    #[googletest::test]
    fn tags_are_padded_to_eight_bytes() {
        let bytes = TagStreamBuilder::new().boot_loader_name(c"abc").build();
        // Header, then an 8-byte tag header and "abc\0" padded to 8.
        assert_that!(bytes.len(), eq(24));
        assert_that!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), eq(12));
    }
}
