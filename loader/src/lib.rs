//! Minimal ELF ingestion for the Koi engine.
//!
//! The engine needs exactly three things from a binary: the entry point (for reference —
//! callers usually pick their own start address), and for every section that actually carries
//! bytes its name, its on-disk virtual base (`sh_addr`) and its contents. Everything else in
//! the file is ignored. Relocation of the image into the engine's address space is the
//! caller's job.

use std::{fs, path::Path};

use elf::{ElfBytes, abi::SHT_NOBITS, endian::AnyEndian};
use thiserror::Error;
use tracing::debug;

// ERRORS
// ================================================================================================

/// Errors produced while ingesting a binary.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse ELF")]
    Parse(#[from] elf::ParseError),
}

// ELF IMAGE
// ================================================================================================

/// One section that carries bytes: name, on-disk virtual base and contents.
#[derive(Clone, Debug)]
pub struct ElfSection {
    pub name: String,
    pub base: u64,
    pub data: Vec<u8>,
}

/// Parsed view of an ELF binary.
#[derive(Clone, Debug, Default)]
pub struct ElfImage {
    /// Entry point from the ELF header.
    pub entry: u64,
    /// Every non-`NOBITS` section, in file order.
    pub sections: Vec<ElfSection>,
}

impl ElfImage {
    /// Reads and parses the binary at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoaderError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| LoaderError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let image = Self::parse(&data)?;
        debug!(
            path = %path.display(),
            sections = image.sections.len(),
            entry = format_args!("{:#x}", image.entry),
            "parsed ELF"
        );
        Ok(image)
    }

    /// Parses an ELF binary from bytes already in memory.
    pub fn parse(data: &[u8]) -> Result<Self, LoaderError> {
        let elf = ElfBytes::<AnyEndian>::minimal_parse(data)?;
        let entry = elf.ehdr.e_entry;

        let mut sections = Vec::new();
        if let (Some(shdrs), Some(strtab)) = elf.section_headers_with_strtab()? {
            for shdr in shdrs.iter() {
                // NOBITS sections (.bss and friends) occupy no file bytes
                if shdr.sh_type == SHT_NOBITS {
                    continue;
                }
                let name = strtab.get(shdr.sh_name as usize)?.to_string();
                let (bytes, _) = elf.section_data(&shdr)?;
                sections.push(ElfSection {
                    name,
                    base: shdr.sh_addr,
                    data: bytes.to_vec(),
                });
            }
        }

        Ok(Self { entry, sections })
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{ElfImage, LoaderError};

    /// A 64-byte ELF64 header with no program or section headers.
    fn minimal_elf(entry: u64) -> Vec<u8> {
        let mut bytes = vec![0u8; 64];
        bytes[..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        bytes[4] = 2; // ELFCLASS64
        bytes[5] = 1; // ELFDATA2LSB
        bytes[6] = 1; // EV_CURRENT
        bytes[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        bytes[18..20].copy_from_slice(&0x3eu16.to_le_bytes()); // EM_X86_64
        bytes[20..24].copy_from_slice(&1u32.to_le_bytes());
        bytes[24..32].copy_from_slice(&entry.to_le_bytes());
        bytes[52..54].copy_from_slice(&64u16.to_le_bytes()); // e_ehsize
        bytes
    }

    #[test]
    fn parses_the_entry_point_of_a_headerless_image() {
        let image = ElfImage::parse(&minimal_elf(0x40_1000)).unwrap();
        assert_eq!(image.entry, 0x40_1000);
        assert_eq!(image.sections.len(), 0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(ElfImage::parse(&[0u8; 16]), Err(LoaderError::Parse(_))));
    }

    #[test]
    fn missing_file_reports_the_path() {
        let err = ElfImage::load("/nonexistent/koi-binary").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/koi-binary"));
    }
}
