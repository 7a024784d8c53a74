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

//! Wire format of the multiboot2 boot information block.
//!
//! The block starts with an 8-byte header (total size, reserved) followed by tags. Every
//! tag starts with its type and size and is padded to the next 8-byte boundary; the size
//! does not include the padding.
//!
//! See <https://www.gnu.org/software/grub/manual/multiboot2/multiboot.html#Boot-information-format>.

use core::mem::size_of;

use strum::{Display, FromRepr};
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::error::FormatError;

/// Tags start at addresses aligned to this many bytes.
pub const TAG_ALIGN: usize = 8;

/// Size of the `total_size` and `reserved` fields preceding the first tag.
pub const INFO_HEADER_SIZE: usize = size_of::<InfoHeader>();

/// Tag type identifiers assigned by the multiboot2 specification.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, FromRepr)]
#[repr(u32)]
pub enum TagType {
    End = 0,
    Cmdline = 1,
    BootLoaderName = 2,
    Module = 3,
    BasicMeminfo = 4,
    Bootdev = 5,
    Mmap = 6,
    Vbe = 7,
    Framebuffer = 8,
    ElfSections = 9,
    Apm = 10,
    Efi32 = 11,
    Efi64 = 12,
    Smbios = 13,
    AcpiOld = 14,
    AcpiNew = 15,
    Network = 16,
    EfiMmap = 17,
    EfiBs = 18,
    Efi32Ih = 19,
    Efi64Ih = 20,
    LoadBaseAddr = 21,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable)]
pub struct InfoHeader {
    pub total_size: u32,
    pub reserved: u32,
}
static_assertions::assert_eq_size!(InfoHeader, [u8; 8usize]);

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable)]
pub struct TagHeader {
    pub typ: u32,
    /// Header plus payload, without the trailing padding.
    pub size: u32,
}
static_assertions::assert_eq_size!(TagHeader, [u8; 8usize]);

#[repr(C)]
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable)]
pub struct MmapTagHeader {
    pub header: TagHeader,
    pub entry_size: u32,
    pub entry_version: u32,
}
static_assertions::assert_eq_size!(MmapTagHeader, [u8; 16usize]);

/// One memory region as reported by the bootloader.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable)]
pub struct MmapEntry {
    pub addr: u64,
    pub len: u64,
    pub typ: u32,
    pub reserved: u32,
}
static_assertions::assert_eq_size!(MmapEntry, [u8; 24usize]);

#[repr(C)]
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable)]
pub struct ModuleTagHeader {
    pub header: TagHeader,
    pub mod_start: u32,
    pub mod_end: u32,
}
static_assertions::assert_eq_size!(ModuleTagHeader, [u8; 16usize]);

#[repr(C)]
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable)]
pub struct Efi64Tag {
    pub header: TagHeader,
    pub pointer: u64,
}
static_assertions::assert_eq_size!(Efi64Tag, [u8; 16usize]);

#[repr(C)]
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable)]
pub struct EfiMmapTagHeader {
    pub header: TagHeader,
    pub descr_size: u32,
    pub descr_vers: u32,
}
static_assertions::assert_eq_size!(EfiMmapTagHeader, [u8; 16usize]);

/// Read-only view over a boot information block.
///
/// Addresses handed out for inline payloads (strings, the RSDP, the EFI memory map) are
/// `base` plus the offset of the payload in the block.
#[derive(Copy, Clone, Debug)]
pub struct TagStream<'a> {
    bytes: &'a [u8],
    base: u64,
}

impl<'a> TagStream<'a> {
    /// Wraps a block that lives at the address of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Result<Self, FormatError> {
        Self::with_base(bytes, bytes.as_ptr() as u64)
    }

    /// Wraps a copy of a block that the bootloader placed at physical address `base`.
    ///
    /// Only the first `total_size` bytes of `bytes` are considered.
    pub fn with_base(bytes: &'a [u8], base: u64) -> Result<Self, FormatError> {
        let (header, _) = InfoHeader::read_from_prefix(bytes)
            .map_err(|_| FormatError::StreamTooShort { len: bytes.len() })?;
        let bytes = bytes.get(..header.total_size as usize).ok_or(
            FormatError::TotalSizeExceedsBuffer {
                total_size: header.total_size,
                available: bytes.len(),
            },
        )?;
        Ok(Self { bytes, base })
    }

    /// Wraps the block handed over by the bootloader.
    ///
    /// # Safety
    ///
    /// `mbi` must point to a multiboot2 boot information block that stays mapped and
    /// unmodified for `'static`, and whose `total_size` field covers readable memory.
    pub unsafe fn from_ptr(mbi: *const u8) -> Result<TagStream<'static>, FormatError> {
        // Safety: the caller guarantees the header is readable; the block is only required
        // to be 8-byte aligned by the protocol, so don't rely on it.
        let total_size = unsafe { mbi.cast::<u32>().read_unaligned() };
        let len = (total_size as usize).max(INFO_HEADER_SIZE);
        // Safety: the caller guarantees `total_size` bytes are readable for `'static`.
        let bytes = unsafe { core::slice::from_raw_parts(mbi, len) };
        TagStream::with_base(bytes, mbi as u64)
    }

    /// Physical address of the first byte of the block.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Size of the block as declared in its header.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.len() <= INFO_HEADER_SIZE
    }

    /// Reads the header of the tag starting at `offset`.
    pub fn header_at(&self, offset: usize) -> Result<TagHeader, FormatError> {
        let rest = self.bytes.get(offset..).unwrap_or_default();
        TagHeader::read_from_prefix(rest)
            .map(|(header, _)| header)
            .map_err(|_| FormatError::TruncatedTag { offset })
    }

    /// Returns the tag at `offset`, covering the `header.size` bytes it declares or as
    /// many of them as the block holds.
    ///
    /// A tag running past the end of the block is only an error once it is parsed.
    pub fn tag_at(&self, offset: usize, header: TagHeader) -> Result<RawTag<'a>, FormatError> {
        let rest = self.bytes.get(offset..).ok_or(FormatError::TruncatedTag { offset })?;
        let bytes = rest.get(..header.size as usize).unwrap_or(rest);
        Ok(RawTag { offset, address: self.base + offset as u64, header, bytes })
    }
}

/// A tag whose type has not been interpreted yet.
#[derive(Copy, Clone, Debug)]
pub struct RawTag<'a> {
    offset: usize,
    address: u64,
    header: TagHeader,
    bytes: &'a [u8],
}

impl<'a> RawTag<'a> {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn typ(&self) -> u32 {
        self.header.typ
    }

    pub fn size(&self) -> u32 {
        self.header.size
    }

    /// Whether the block holds all the bytes the tag declares.
    pub fn is_complete(&self) -> bool {
        self.bytes.len() == self.header.size as usize
    }

    /// Interprets the tag according to its type.
    ///
    /// Only checks that the tag is complete and large enough to hold the fixed part of
    /// its type; the payload contents are not validated. Tags the converter doesn't
    /// interpret are returned as [`Tag::Other`] without looking at their payload.
    pub fn parse(self) -> Result<Tag<'a>, FormatError> {
        let typ = TagType::from_repr(self.header.typ);
        let interpreted = matches!(
            typ,
            Some(
                TagType::Mmap
                    | TagType::Module
                    | TagType::BootLoaderName
                    | TagType::AcpiNew
                    | TagType::Efi64
                    | TagType::EfiMmap
            )
        );
        if interpreted && !self.is_complete() {
            return Err(FormatError::TruncatedTag { offset: self.offset });
        }

        let tag = match typ {
            Some(TagType::Mmap) => {
                let (_, entries) = self.read_prefix::<MmapTagHeader>()?;
                Tag::Mmap(MemoryMapTag { entries })
            }
            Some(TagType::Module) => {
                let (hdr, _) = self.read_prefix::<ModuleTagHeader>()?;
                Tag::Module(ModuleTag {
                    mod_start: hdr.mod_start,
                    mod_end: hdr.mod_end,
                    cmdline_address: self.payload_address(size_of::<ModuleTagHeader>()),
                })
            }
            Some(TagType::BootLoaderName) => {
                self.read_prefix::<TagHeader>()?;
                Tag::BootLoaderName(StringTag {
                    address: self.payload_address(size_of::<TagHeader>()),
                })
            }
            Some(TagType::AcpiNew) => {
                self.read_prefix::<TagHeader>()?;
                Tag::AcpiNew(AcpiTag { rsdp_address: self.payload_address(size_of::<TagHeader>()) })
            }
            Some(TagType::Efi64) => {
                let (tag, _) = self.read_prefix::<Efi64Tag>()?;
                Tag::Efi64(Efi64SystemTable { pointer: tag.pointer })
            }
            Some(TagType::EfiMmap) => {
                let (hdr, map) = self.read_prefix::<EfiMmapTagHeader>()?;
                Tag::EfiMmap(EfiMemoryMapTag {
                    descr_size: hdr.descr_size,
                    descr_vers: hdr.descr_vers,
                    map_address: self.payload_address(size_of::<EfiMmapTagHeader>()),
                    map_size: map.len() as u32,
                })
            }
            _ => Tag::Other(self.header.typ),
        };
        Ok(tag)
    }

    fn read_prefix<T: FromBytes>(&self) -> Result<(T, &'a [u8]), FormatError> {
        T::read_from_prefix(self.bytes).map_err(|_| FormatError::TagTooSmall {
            typ: self.header.typ,
            size: self.header.size,
            min: size_of::<T>(),
        })
    }

    fn payload_address(&self, offset: usize) -> u64 {
        self.address + offset as u64
    }
}

/// Tags the converter knows how to interpret.
#[derive(Copy, Clone, Debug)]
pub enum Tag<'a> {
    Mmap(MemoryMapTag<'a>),
    Module(ModuleTag),
    BootLoaderName(StringTag),
    AcpiNew(AcpiTag),
    Efi64(Efi64SystemTable),
    EfiMmap(EfiMemoryMapTag),
    /// Everything else, by numeric type; may or may not be an assigned id.
    Other(u32),
}

#[derive(Copy, Clone, Debug)]
pub struct MemoryMapTag<'a> {
    /// The bytes following the fixed part; entries are always 24 bytes apart.
    entries: &'a [u8],
}

impl<'a> MemoryMapTag<'a> {
    /// Number of complete entries in the tag, i.e. `(size - 16) / 24`.
    pub fn len(&self) -> usize {
        self.entries.len() / size_of::<MmapEntry>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in stream order. A trailing partial entry is ignored.
    pub fn entries(&self) -> impl Iterator<Item = MmapEntry> + 'a {
        let entries = self.entries;
        entries
            .chunks_exact(size_of::<MmapEntry>())
            .filter_map(|chunk| MmapEntry::read_from_bytes(chunk).ok())
    }
}

#[derive(Copy, Clone, Debug)]
pub struct ModuleTag {
    pub mod_start: u32,
    pub mod_end: u32,
    /// Address of the NUL-terminated command line following the fixed fields.
    pub cmdline_address: u64,
}

#[derive(Copy, Clone, Debug)]
pub struct StringTag {
    /// Address of the NUL-terminated string payload.
    pub address: u64,
}

#[derive(Copy, Clone, Debug)]
pub struct AcpiTag {
    /// Address of the copy of the RSDP inside the tag.
    pub rsdp_address: u64,
}

#[derive(Copy, Clone, Debug)]
pub struct Efi64SystemTable {
    pub pointer: u64,
}

#[derive(Copy, Clone, Debug)]
pub struct EfiMemoryMapTag {
    pub descr_size: u32,
    pub descr_vers: u32,
    /// Address of the descriptor array following the fixed fields.
    pub map_address: u64,
    /// Size of the descriptor array in bytes.
    pub map_size: u32,
}
