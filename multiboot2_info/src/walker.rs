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

use crate::{
    error::FormatError,
    handlers::{self, TagOutcome},
    info::{InfoFlags, NormalizedBootInfo},
    tag::{RawTag, Tag, TagStream, TagType, INFO_HEADER_SIZE, TAG_ALIGN},
};

/// How a successful walk came to an end.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    /// An END tag was found.
    EndTag,
    /// The cursor reached `total_size` without seeing an END tag.
    EndOfStream,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WalkSummary {
    pub termination: Termination,
    /// Number of tags dispatched, not counting the END tag.
    pub tags_seen: u32,
    /// Number of module tags seen, whether they were stored or not.
    pub modules_seen: u32,
}

/// Single pass over the tags of a boot information block.
pub struct TagWalker<'a> {
    stream: TagStream<'a>,
    cursor: usize,
    module_index: u32,
    tags_seen: u32,
}

impl<'a> TagWalker<'a> {
    pub fn new(stream: TagStream<'a>) -> Self {
        Self { stream, cursor: INFO_HEADER_SIZE, module_index: 0, tags_seen: 0 }
    }

    /// Walks all tags, filling in `info`.
    ///
    /// Stops at the first format error; whatever was stored before it stays in `info`.
    pub fn run(mut self, info: &mut NormalizedBootInfo) -> Result<WalkSummary, FormatError> {
        let termination = self.scan(info).inspect_err(|err| {
            log::error!("multiboot2 info format error: {err}");
        })?;

        if !info.flags().intersects(InfoFlags::HAS_EFI64 | InfoFlags::HAS_EFI_MMAP) {
            log::warn!("no multiboot2 uefi info found!");
        }
        for entry in info.e820_table() {
            log::debug!(
                "E820 entry: [{:#018x}-{:#018x}), len {}, type {}",
                entry.base,
                entry.end(),
                entry.length,
                entry.type_
            );
        }

        Ok(WalkSummary {
            termination,
            tags_seen: self.tags_seen,
            modules_seen: self.module_index,
        })
    }

    fn scan(&mut self, info: &mut NormalizedBootInfo) -> Result<Termination, FormatError> {
        while self.cursor < self.stream.len() {
            let header = self.stream.header_at(self.cursor)?;
            if header.typ == TagType::End as u32 {
                return Ok(Termination::EndTag);
            }
            if header.size == 0 {
                return Err(FormatError::ZeroSizeTag { offset: self.cursor });
            }
            let tag = self.stream.tag_at(self.cursor, header)?;
            self.dispatch(info, tag)?;
            self.tags_seen += 1;
            // The size doesn't include the padding up to the next tag.
            self.cursor += (header.size as usize).next_multiple_of(TAG_ALIGN);
        }
        Ok(Termination::EndOfStream)
    }

    fn dispatch(
        &mut self,
        info: &mut NormalizedBootInfo,
        tag: RawTag<'a>,
    ) -> Result<(), FormatError> {
        let (typ, offset) = (tag.typ(), tag.offset());
        let outcome = match tag.parse()? {
            Tag::Mmap(mmap) => handlers::memory_map(info, &mmap),
            Tag::Module(module) => {
                let index = self.module_index;
                self.module_index += 1;
                handlers::module(info, index, &module)
            }
            Tag::BootLoaderName(name) => handlers::boot_loader_name(info, &name),
            Tag::AcpiNew(acpi) => handlers::acpi_new(info, &acpi),
            Tag::Efi64(efi) => handlers::efi64(info, &efi),
            Tag::EfiMmap(efi_mmap) => handlers::efi_memory_map(info, &efi_mmap)?,
            Tag::Other(typ) => handlers::unrecognized(typ)?,
        };

        match outcome {
            TagOutcome::Stored => {
                if let Some(kind) = TagType::from_repr(typ) {
                    log::debug!("multiboot2 {kind} tag at {offset:#x} stored");
                }
            }
            TagOutcome::Truncated { available, stored } => {
                log::warn!("Too many E820 entries {available}, keeping the first {stored}")
            }
            TagOutcome::Dropped { index, mod_start } => {
                log::error!("unhandled multiboot2 module #{index}: {mod_start:#x}")
            }
            TagOutcome::Ignored(kind) => {
                log::warn!("unhandled multiboot2 tag type: {} ({kind})", kind as u32)
            }
        }
        Ok(())
    }
}

/// Converts the boot information block in `stream` into `info`.
///
/// `info` should be freshly created with [`NormalizedBootInfo::new`].
pub fn convert(
    stream: TagStream<'_>,
    info: &mut NormalizedBootInfo,
) -> Result<WalkSummary, FormatError> {
    TagWalker::new(stream).run(info)
}

/// Converts the boot information block the bootloader left at `mbi`.
///
/// Returns 0 on success, or a negative errno if the block is malformed, in which case
/// `info` is valid but possibly incomplete.
///
/// # Safety
///
/// `mbi` must point to a multiboot2 boot information block that stays mapped and
/// unmodified for the rest of the boot, with `total_size` readable bytes.
pub unsafe fn convert_from_ptr(mbi: *const u8, info: &mut NormalizedBootInfo) -> i32 {
    // Safety: guaranteed by the caller.
    let result = unsafe { TagStream::from_ptr(mbi) }.and_then(|stream| convert(stream, info));
    crate::error::status_code(&result)
}
