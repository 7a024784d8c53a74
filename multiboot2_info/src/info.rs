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

use core::ffi::{c_char, CStr};

use bitflags::bitflags;
use strum::FromRepr;

use crate::tag::MmapEntry;

/// Maximum number of memory map entries kept; the rest are dropped.
pub const E820_MAX_ENTRIES: usize = 32;

/// Maximum number of boot modules kept; the rest are dropped.
pub const MAX_MODULE_COUNT: usize = 4;

/// Loader signature recorded for EFI system tables handed over by a 64-bit multiboot2
/// loader ("EL64").
pub const EFI64_LOADER_SIGNATURE: u32 = u32::from_le_bytes(*b"EL64");

bitflags! {
    /// Which parts of [`NormalizedBootInfo`] are populated.
    ///
    /// Bit positions follow the multiboot1 `flags` field so that consumers written
    /// against it keep working.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct InfoFlags: u32 {
        const HAS_MODS = 1 << 3;
        const HAS_MMAP = 1 << 6;
        /// Never set by the converter: an EFI memory map is reported through
        /// [`InfoFlags::HAS_EFI64`]. Use [`NormalizedBootInfo::efi_sources`] to tell the
        /// two apart.
        const HAS_EFI_MMAP = 1 << 16;
        /// Set when either the EFI system table or the EFI memory map was found.
        const HAS_EFI64 = 1 << 17;
    }

    /// The EFI information that was actually found.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct EfiSources: u8 {
        const SYSTEM_TABLE = 1 << 0;
        const MEMORY_MAP = 1 << 1;
    }
}

/// E820 address range types according to Chapter 15 of the ACPI Specification,
/// Version 6.4. Multiboot2 memory map types share the same values.
///
/// See <https://uefi.org/specs/ACPI/6.4/15_System_Address_Map_Interfaces/Sys_Address_Map_Interfaces.html>.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromRepr)]
#[repr(u32)]
pub enum E820EntryType {
    /// Available RAM usable by the operating system.
    RAM = 1,
    /// In use or reserved by the system.
    RESERVED = 2,
    /// ACPI Reclaim Memory. Available after the OS reads the ACPI tables.
    ACPI = 3,
    /// ACPI NVS memory; in use or reserved by the system.
    NVS = 4,
    /// Memory in which errors have been detected.
    UNUSABLE = 5,
    /// Memory that is not enabled.
    DISABLED = 6,
    /// Persistent memory.
    PMEM = 7,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct E820Entry {
    pub base: u64,
    pub length: u64,
    pub type_: u32,
}

impl E820Entry {
    const EMPTY: Self = Self { base: 0, length: 0, type_: 0 };

    pub fn new(base: u64, length: u64, type_: E820EntryType) -> Self {
        Self { base, length, type_: type_ as u32 }
    }

    /// Returns the decoded type, or `None` for types unknown to the ACPI specification.
    pub fn entry_type(&self) -> Option<E820EntryType> {
        E820EntryType::from_repr(self.type_)
    }

    pub fn end(&self) -> u64 {
        self.base.wrapping_add(self.length)
    }
}

impl From<MmapEntry> for E820Entry {
    fn from(entry: MmapEntry) -> Self {
        Self { base: entry.addr, length: entry.len, type_: entry.typ }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleEntry {
    pub start: u32,
    pub end: u32,
    /// Low 32 bits of the address of the module command line.
    pub cmdline_ptr: u32,
}

impl ModuleEntry {
    const EMPTY: Self = Self { start: 0, end: 0, cmdline_ptr: 0 };
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EfiInfo {
    pub systab: u32,
    pub loader_signature: u32,
    pub memdesc_size: u32,
    pub memdesc_version: u32,
    pub memmap: u32,
    pub memmap_size: u32,
    /// Always zero; memory maps above 4GiB are rejected.
    pub memmap_hi: u32,
}

impl EfiInfo {
    const EMPTY: Self = Self {
        systab: 0,
        loader_signature: 0,
        memdesc_size: 0,
        memdesc_version: 0,
        memmap: 0,
        memmap_size: 0,
        memmap_hi: 0,
    };
}

/// Boot information in the shape expected by the rest of early initialization.
///
/// The structure is owned by the caller and has a fixed size, so it can live on the
/// stack or in a static before any allocator exists. If a conversion is aborted, the
/// fields filled in before the error are still valid, but the structure may be
/// incomplete.
#[repr(C)]
#[derive(Clone, Debug)]
pub struct NormalizedBootInfo {
    flags: InfoFlags,
    efi_sources: EfiSources,
    mmap_entries: u32,
    mmap_entry: [E820Entry; E820_MAX_ENTRIES],
    mods_count: u32,
    mods: [ModuleEntry; MAX_MODULE_COUNT],
    loader_name: u64,
    acpi_rsdp: u64,
    efi_info: EfiInfo,
}

impl NormalizedBootInfo {
    /// Returns an empty structure with every field zeroed.
    pub const fn new() -> Self {
        Self {
            flags: InfoFlags::empty(),
            efi_sources: EfiSources::empty(),
            mmap_entries: 0,
            mmap_entry: [E820Entry::EMPTY; E820_MAX_ENTRIES],
            mods_count: 0,
            mods: [ModuleEntry::EMPTY; MAX_MODULE_COUNT],
            loader_name: 0,
            acpi_rsdp: 0,
            efi_info: EfiInfo::EMPTY,
        }
    }

    pub fn flags(&self) -> InfoFlags {
        self.flags
    }

    /// Which EFI information was found; both kinds map to [`InfoFlags::HAS_EFI64`].
    pub fn efi_sources(&self) -> EfiSources {
        self.efi_sources
    }

    pub fn e820_table(&self) -> &[E820Entry] {
        &self.mmap_entry[..self.mmap_entries as usize]
    }

    pub fn modules(&self) -> &[ModuleEntry] {
        &self.mods[..self.mods_count as usize]
    }

    /// Address of the bootloader name, or 0 if the bootloader didn't provide one.
    pub fn loader_name_addr(&self) -> u64 {
        self.loader_name
    }

    /// Returns the name of the bootloader, if one was provided.
    ///
    /// # Safety
    ///
    /// The boot information block must still be mapped at the address it was parsed at.
    pub unsafe fn loader_name(&self) -> Option<&CStr> {
        match self.loader_name {
            0 => None,
            // Safety: the caller guarantees the address still points into the boot
            // information block, where the bootloader put a NUL-terminated string.
            addr => Some(unsafe { CStr::from_ptr(addr as usize as *const c_char) }),
        }
    }

    /// Address of the ACPI RSDP, or 0 if it was not provided.
    pub fn acpi_rsdp_addr(&self) -> u64 {
        self.acpi_rsdp
    }

    pub fn efi_info(&self) -> &EfiInfo {
        &self.efi_info
    }

    /// Replaces the memory map, keeping at most [`E820_MAX_ENTRIES`] entries.
    ///
    /// Returns the number of entries stored.
    pub(crate) fn set_e820_table<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = E820Entry>,
    {
        let mut count = 0;
        for (slot, entry) in self.mmap_entry.iter_mut().zip(entries) {
            *slot = entry;
            count += 1;
        }
        self.mmap_entry[count..].fill(E820Entry::EMPTY);
        self.mmap_entries = count as u32;
        count
    }

    /// Stores a module at `index`; returns false if `index` is beyond capacity.
    pub(crate) fn store_module(&mut self, index: u32, module: ModuleEntry) -> bool {
        let Some(slot) = self.mods.get_mut(index as usize) else {
            return false;
        };
        *slot = module;
        self.mods_count = index + 1;
        true
    }

    pub(crate) fn insert_flags(&mut self, flags: InfoFlags) {
        self.flags.insert(flags);
    }

    pub(crate) fn set_loader_name(&mut self, addr: u64) {
        self.loader_name = addr;
    }

    pub(crate) fn set_acpi_rsdp(&mut self, addr: u64) {
        self.acpi_rsdp = addr;
    }

    pub(crate) fn efi_info_mut(&mut self) -> &mut EfiInfo {
        &mut self.efi_info
    }

    /// Records that EFI information was found, collapsing it onto the shared flag.
    pub(crate) fn add_efi_source(&mut self, source: EfiSources) {
        self.efi_sources.insert(source);
        self.flags.insert(InfoFlags::HAS_EFI64);
    }
}

impl Default for NormalizedBootInfo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    #[googletest::test]
    fn new_is_empty() {
        let info = NormalizedBootInfo::new();
        expect_that!(info.flags(), eq(InfoFlags::empty()));
        expect_that!(info.efi_sources(), eq(EfiSources::empty()));
        expect_that!(info.e820_table().len(), eq(0));
        expect_that!(info.modules().len(), eq(0));
        expect_that!(info.loader_name_addr(), eq(0));
        expect_that!(unsafe { info.loader_name() }.is_none(), eq(true));
        expect_that!(info.acpi_rsdp_addr(), eq(0));
        expect_that!(*info.efi_info(), eq(EfiInfo::default()));
    }

    #[googletest::test]
    fn set_e820_table_clamps_to_capacity() {
        let mut info = NormalizedBootInfo::new();
        let entries = (0..E820_MAX_ENTRIES as u64 + 5)
            .map(|i| E820Entry::new(i * 0x1000, 0x1000, E820EntryType::RAM));

        assert_that!(info.set_e820_table(entries), eq(E820_MAX_ENTRIES));
        assert_that!(info.e820_table().len(), eq(E820_MAX_ENTRIES));
        expect_that!(
            info.e820_table().last().copied(),
            some(eq(E820Entry::new(31 * 0x1000, 0x1000, E820EntryType::RAM)))
        );
    }

    #[googletest::test]
    fn set_e820_table_clears_previous_entries() {
        let mut info = NormalizedBootInfo::new();
        info.set_e820_table([
            E820Entry::new(0, 0x1000, E820EntryType::RAM),
            E820Entry::new(0x1000, 0x1000, E820EntryType::RESERVED),
        ]);
        info.set_e820_table([E820Entry::new(0x2000, 0x1000, E820EntryType::ACPI)]);

        assert_that!(info.e820_table().len(), eq(1));
        expect_that!(info.e820_table()[0].entry_type(), some(eq(E820EntryType::ACPI)));
        expect_that!(info.mmap_entry[1], eq(E820Entry::default()));
    }

    #[googletest::test]
    fn store_module_beyond_capacity_is_refused() {
        let mut info = NormalizedBootInfo::new();
        let module = ModuleEntry { start: 0x1000, end: 0x2000, cmdline_ptr: 0 };

        expect_that!(info.store_module(MAX_MODULE_COUNT as u32 - 1, module), eq(true));
        expect_that!(info.modules().len(), eq(MAX_MODULE_COUNT));
        expect_that!(info.store_module(MAX_MODULE_COUNT as u32, module), eq(false));
        expect_that!(info.modules().len(), eq(MAX_MODULE_COUNT));
    }

    #[googletest::test]
    fn efi_sources_share_one_flag() {
        let mut info = NormalizedBootInfo::new();
        info.add_efi_source(EfiSources::MEMORY_MAP);
        expect_that!(info.flags(), eq(InfoFlags::HAS_EFI64));
        info.add_efi_source(EfiSources::SYSTEM_TABLE);
        expect_that!(info.flags(), eq(InfoFlags::HAS_EFI64));
        expect_that!(info.efi_sources(), eq(EfiSources::all()));
    }

    #[googletest::test]
    fn e820_entry_type_decoding() {
        let entry = E820Entry { base: 0, length: 0x1000, type_: 1 };
        expect_that!(entry.entry_type(), some(eq(E820EntryType::RAM)));
        expect_that!(entry.end(), eq(0x1000));
        expect_that!(E820Entry { type_: 42, ..entry }.entry_type(), none());
    }

    #[googletest::test]
    fn loader_signature_spells_el64() {
        assert_that!(EFI64_LOADER_SIGNATURE, eq(0x3436_4c45));
    }
}
