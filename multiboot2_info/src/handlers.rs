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

//! Per-tag transformations into [`NormalizedBootInfo`].
//!
//! Handlers don't log; they report what happened through [`TagOutcome`] and leave the
//! diagnostics to the walker.

use crate::{
    error::FormatError,
    info::{
        E820Entry, EfiSources, InfoFlags, ModuleEntry, NormalizedBootInfo,
        EFI64_LOADER_SIGNATURE,
    },
    tag::{
        AcpiTag, Efi64SystemTable, EfiMemoryMapTag, MemoryMapTag, ModuleTag, StringTag, TagType,
    },
};

/// Non-fatal result of handling a single tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TagOutcome {
    /// The tag was fully stored.
    Stored,
    /// The memory map held `available` entries, only the first `stored` were kept.
    Truncated { available: usize, stored: usize },
    /// The module at `index` didn't fit and was dropped.
    Dropped { index: u32, mod_start: u32 },
    /// Assigned tag type the converter has no use for.
    Ignored(TagType),
}

/// Replaces the memory map with the entries of `tag`, in stream order.
pub fn memory_map(info: &mut NormalizedBootInfo, tag: &MemoryMapTag<'_>) -> TagOutcome {
    info.insert_flags(InfoFlags::HAS_MMAP);
    let available = tag.len();
    let stored = info.set_e820_table(tag.entries().map(E820Entry::from));
    if stored < available {
        TagOutcome::Truncated { available, stored }
    } else {
        TagOutcome::Stored
    }
}

/// Stores the `index`-th module tag seen in the stream.
///
/// `HAS_MODS` is set even if the module doesn't fit.
pub fn module(info: &mut NormalizedBootInfo, index: u32, tag: &ModuleTag) -> TagOutcome {
    info.insert_flags(InfoFlags::HAS_MODS);
    let module = ModuleEntry {
        start: tag.mod_start,
        end: tag.mod_end,
        // Modules are loaded below 4GiB, and so is the block describing them.
        cmdline_ptr: tag.cmdline_address as u32,
    };
    if info.store_module(index, module) {
        TagOutcome::Stored
    } else {
        TagOutcome::Dropped { index, mod_start: tag.mod_start }
    }
}

pub fn boot_loader_name(info: &mut NormalizedBootInfo, tag: &StringTag) -> TagOutcome {
    info.set_loader_name(tag.address);
    TagOutcome::Stored
}

pub fn acpi_new(info: &mut NormalizedBootInfo, tag: &AcpiTag) -> TagOutcome {
    info.set_acpi_rsdp(tag.rsdp_address);
    TagOutcome::Stored
}

/// Records the EFI system table.
///
/// Unlike [`efi_memory_map`], the pointer is not checked against 4GiB: the boot protocol
/// guarantees the system table lives below it, and only the low half is kept.
pub fn efi64(info: &mut NormalizedBootInfo, tag: &Efi64SystemTable) -> TagOutcome {
    let efi_info = info.efi_info_mut();
    efi_info.systab = tag.pointer as u32;
    efi_info.loader_signature = EFI64_LOADER_SIGNATURE;
    info.add_efi_source(EfiSources::SYSTEM_TABLE);
    TagOutcome::Stored
}

/// Records the EFI memory map, which must lie entirely below 4GiB.
///
/// Nothing is stored if the map is above 4GiB.
pub fn efi_memory_map(
    info: &mut NormalizedBootInfo,
    tag: &EfiMemoryMapTag,
) -> Result<TagOutcome, FormatError> {
    let memmap_hi = (tag.map_address >> 32) as u32;
    if memmap_hi != 0 {
        return Err(FormatError::EfiMemoryMapAbove4G { address: tag.map_address });
    }

    let efi_info = info.efi_info_mut();
    efi_info.memdesc_size = tag.descr_size;
    efi_info.memdesc_version = tag.descr_vers;
    efi_info.memmap = tag.map_address as u32;
    efi_info.memmap_size = tag.map_size;
    efi_info.memmap_hi = memmap_hi;
    info.add_efi_source(EfiSources::MEMORY_MAP);
    Ok(TagOutcome::Stored)
}

/// Handles every tag type without a dedicated handler.
pub fn unrecognized(typ: u32) -> Result<TagOutcome, FormatError> {
    TagType::from_repr(typ).map(TagOutcome::Ignored).ok_or(FormatError::UnknownTagType { typ })
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;
    use crate::{
        builder::TagStreamBuilder,
        info::{EfiInfo, E820_MAX_ENTRIES, MAX_MODULE_COUNT},
        tag::{MmapEntry, Tag, TagStream},
    };

    fn parse_first(bytes: &[u8], base: u64) -> Tag<'_> {
        let stream = TagStream::with_base(bytes, base).unwrap();
        let header = stream.header_at(8).unwrap();
        stream.tag_at(8, header).unwrap().parse().unwrap()
    }

    fn ram(addr: u64, len: u64) -> MmapEntry {
        MmapEntry { addr, len, typ: 1, reserved: 0 }
    }

    #[googletest::test]
    fn memory_map_truncates_to_capacity() {
        let entries: Vec<MmapEntry> =
            (0..E820_MAX_ENTRIES as u64 + 3).map(|i| ram(i << 20, 1 << 20)).collect();
        let bytes = TagStreamBuilder::new().mmap(&entries).end().build();
        let Tag::Mmap(tag) = parse_first(&bytes, 0) else { panic!("expected a memory map") };
        let mut info = NormalizedBootInfo::new();

        assert_that!(
            memory_map(&mut info, &tag),
            eq(TagOutcome::Truncated { available: E820_MAX_ENTRIES + 3, stored: E820_MAX_ENTRIES })
        );
        assert_that!(info.e820_table().len(), eq(E820_MAX_ENTRIES));
        for (stored, entry) in info.e820_table().iter().zip(&entries) {
            expect_that!(*stored, eq(E820Entry::from(*entry)));
        }
        expect_that!(info.flags(), eq(InfoFlags::HAS_MMAP));
    }

    #[googletest::test]
    fn empty_memory_map_still_sets_flag() {
        let bytes = TagStreamBuilder::new().mmap(&[]).end().build();
        let Tag::Mmap(tag) = parse_first(&bytes, 0) else { panic!("expected a memory map") };
        let mut info = NormalizedBootInfo::new();

        assert_that!(memory_map(&mut info, &tag), eq(TagOutcome::Stored));
        expect_that!(info.e820_table().len(), eq(0));
        expect_that!(info.flags(), eq(InfoFlags::HAS_MMAP));
    }

    #[googletest::test]
    fn module_beyond_capacity_is_dropped_but_flagged() {
        let bytes = TagStreamBuilder::new().module(0x40_0000, 0x50_0000, c"extra").end().build();
        let Tag::Module(tag) = parse_first(&bytes, 0x10_0000) else { panic!("expected a module") };
        let mut info = NormalizedBootInfo::new();

        assert_that!(
            module(&mut info, MAX_MODULE_COUNT as u32, &tag),
            eq(TagOutcome::Dropped { index: MAX_MODULE_COUNT as u32, mod_start: 0x40_0000 })
        );
        expect_that!(info.modules().len(), eq(0));
        expect_that!(info.flags(), eq(InfoFlags::HAS_MODS));
    }

    #[googletest::test]
    fn module_cmdline_pointer_is_truncated() {
        let bytes = TagStreamBuilder::new().module(0x1000, 0x2000, c"").end().build();
        let Tag::Module(tag) = parse_first(&bytes, 0x2_0000_0000) else {
            panic!("expected a module")
        };
        let mut info = NormalizedBootInfo::new();

        assert_that!(module(&mut info, 0, &tag), eq(TagOutcome::Stored));
        assert_that!(
            info.modules()[0],
            eq(ModuleEntry { start: 0x1000, end: 0x2000, cmdline_ptr: 8 + 16 })
        );
    }

    #[googletest::test]
    fn efi64_keeps_low_half_of_any_pointer() {
        let mut info = NormalizedBootInfo::new();

        assert_that!(
            efi64(&mut info, &Efi64SystemTable { pointer: 0x1_8000_1000 }),
            eq(TagOutcome::Stored)
        );
        expect_that!(info.efi_info().systab, eq(0x8000_1000));
        expect_that!(info.efi_info().loader_signature, eq(EFI64_LOADER_SIGNATURE));
        expect_that!(info.flags(), eq(InfoFlags::HAS_EFI64));
        expect_that!(info.efi_sources(), eq(EfiSources::SYSTEM_TABLE));
    }

    #[googletest::test]
    fn efi_memory_map_above_4g_commits_nothing() {
        let mut info = NormalizedBootInfo::new();
        let tag = EfiMemoryMapTag {
            descr_size: 48,
            descr_vers: 1,
            map_address: 0x1_0000_0010,
            map_size: 480,
        };

        assert_that!(
            efi_memory_map(&mut info, &tag),
            err(eq(FormatError::EfiMemoryMapAbove4G { address: 0x1_0000_0010 }))
        );
        expect_that!(info.flags(), eq(InfoFlags::empty()));
        expect_that!(info.efi_sources(), eq(EfiSources::empty()));
        expect_that!(*info.efi_info(), eq(EfiInfo::default()));
    }

    #[googletest::test]
    fn efi_memory_map_below_4g_sets_shared_flag() {
        let mut info = NormalizedBootInfo::new();
        let tag = EfiMemoryMapTag {
            descr_size: 48,
            descr_vers: 1,
            map_address: 0xFFFF_F000,
            map_size: 480,
        };

        assert_that!(efi_memory_map(&mut info, &tag), ok(eq(TagOutcome::Stored)));
        expect_that!(
            *info.efi_info(),
            eq(EfiInfo {
                memdesc_size: 48,
                memdesc_version: 1,
                memmap: 0xFFFF_F000,
                memmap_size: 480,
                ..EfiInfo::default()
            })
        );
        expect_that!(info.flags(), eq(InfoFlags::HAS_EFI64));
        expect_that!(info.efi_sources(), eq(EfiSources::MEMORY_MAP));
    }

    #[googletest::test]
    fn string_and_acpi_tags_store_addresses() {
        let bytes = TagStreamBuilder::new().boot_loader_name(c"GRUB 2.12").end().build();
        let Tag::BootLoaderName(name) = parse_first(&bytes, 0x9000) else {
            panic!("expected a loader name")
        };
        let mut info = NormalizedBootInfo::new();

        assert_that!(boot_loader_name(&mut info, &name), eq(TagOutcome::Stored));
        assert_that!(
            acpi_new(&mut info, &AcpiTag { rsdp_address: 0xE_0000 }),
            eq(TagOutcome::Stored)
        );
        expect_that!(info.loader_name_addr(), eq(0x9000 + 16));
        expect_that!(info.acpi_rsdp_addr(), eq(0xE_0000));
        expect_that!(info.flags(), eq(InfoFlags::empty()));
    }

    #[googletest::test]
    fn unrecognized_types() {
        expect_that!(
            unrecognized(TagType::AcpiOld as u32),
            ok(eq(TagOutcome::Ignored(TagType::AcpiOld)))
        );
        expect_that!(
            unrecognized(TagType::LoadBaseAddr as u32),
            ok(eq(TagOutcome::Ignored(TagType::LoadBaseAddr)))
        );
        expect_that!(unrecognized(22), err(eq(FormatError::UnknownTagType { typ: 22 })));
    }
}
