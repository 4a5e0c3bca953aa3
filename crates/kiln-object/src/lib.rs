//! Kiln Object Writer
//!
//! Accumulates the output of every method compilation into one relocatable
//! program image and encodes it for a downstream linker:
//! - **Sections**: aligned allocation and in-place patching (`section` module)
//! - **Symbols & relocations**: names and deferred fixups (`symbol`, `relocation`)
//! - **Image**: the mutex-guarded shared state workers merge into (`image` module)
//! - **ELF32**: relocatable object encoding (`elf32` module)

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod elf32;
pub mod error;
pub mod image;
pub mod relocation;
pub mod section;
pub mod symbol;

pub use error::ObjectError;
pub use image::{Fragment, ImageContents, ProgramImage};
pub use relocation::{FragmentRelocation, LinkType, Relocation, TargetMachine, I386};
pub use section::{Allocation, PatchKind, Section, SectionKind};
pub use symbol::{Symbol, SymbolBinding, SymbolKind};
