//! The compiled-code record handed back to the caller.
//!
//! Both compilation paths produce a [`CompiledArtifact`]; the metadata that
//! comes with the code depends on the path and is kept in an
//! [`ArtifactLayout`] so the two sets can never be mixed:
//!
//! | Layout      | Mapping table | Stack maps | VMap table | Native GC map |
//! |-------------|:-------------:|:----------:|:----------:|:-------------:|
//! | `Optimized` | yes           | yes        |            |               |
//! | `Baseline`  | yes           |            | yes        | yes           |

use crate::backend::Architecture;

/// Path-specific metadata of a [`CompiledArtifact`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLayout {
    /// Output of the optimizing pipeline.
    Optimized {
        /// Native pc to dex pc mapping.
        mapping_table: Vec<u8>,
        /// Frame state at every safepoint.
        stack_map_table: Vec<u8>,
    },
    /// Output of the baseline code generator.
    Baseline {
        /// Native pc to dex pc mapping.
        mapping_table: Vec<u8>,
        /// Virtual registers promoted to machine registers.
        vmap_table: Vec<u8>,
        /// Reference bitmaps over virtual registers at every safepoint.
        native_gc_map: Vec<u8>,
    },
}

/// Machine code for one method plus the metadata the runtime needs to run,
/// collect and deoptimize it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    architecture: Architecture,
    code: Vec<u8>,
    frame_size: u32,
    core_spill_mask: u32,
    fp_spill_mask: u32,
    layout: ArtifactLayout,
}

impl CompiledArtifact {
    /// Packages the output of the optimized path.
    #[must_use]
    pub fn optimized(
        architecture: Architecture,
        code: Vec<u8>,
        frame_size: u32,
        core_spill_mask: u32,
        mapping_table: Vec<u8>,
        stack_map_table: Vec<u8>,
    ) -> Self {
        Self {
            architecture,
            code,
            frame_size,
            core_spill_mask,
            fp_spill_mask: 0,
            layout: ArtifactLayout::Optimized {
                mapping_table,
                stack_map_table,
            },
        }
    }

    /// Packages the output of the baseline path.
    #[must_use]
    pub fn baseline(
        architecture: Architecture,
        code: Vec<u8>,
        frame_size: u32,
        core_spill_mask: u32,
        mapping_table: Vec<u8>,
        vmap_table: Vec<u8>,
        native_gc_map: Vec<u8>,
    ) -> Self {
        Self {
            architecture,
            code,
            frame_size,
            core_spill_mask,
            fp_spill_mask: 0,
            layout: ArtifactLayout::Baseline {
                mapping_table,
                vmap_table,
                native_gc_map,
            },
        }
    }

    /// Target the code was generated for.
    #[must_use]
    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// The machine code.
    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Frame size in bytes, return address included.
    #[must_use]
    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    /// Core registers saved in the frame.
    #[must_use]
    pub fn core_spill_mask(&self) -> u32 {
        self.core_spill_mask
    }

    /// Floating-point registers saved in the frame. Always `0`.
    #[must_use]
    pub fn fp_spill_mask(&self) -> u32 {
        self.fp_spill_mask
    }

    /// Path-specific metadata.
    #[must_use]
    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// `true` for output of the optimized path.
    #[must_use]
    pub fn is_optimized(&self) -> bool {
        matches!(self.layout, ArtifactLayout::Optimized { .. })
    }

    /// Native pc to dex pc mapping; present in both layouts.
    #[must_use]
    pub fn mapping_table(&self) -> &[u8] {
        match &self.layout {
            ArtifactLayout::Optimized { mapping_table, .. }
            | ArtifactLayout::Baseline { mapping_table, .. } => mapping_table,
        }
    }

    /// Stack maps, optimized layout only.
    #[must_use]
    pub fn stack_map_table(&self) -> Option<&[u8]> {
        match &self.layout {
            ArtifactLayout::Optimized {
                stack_map_table, ..
            } => Some(stack_map_table),
            ArtifactLayout::Baseline { .. } => None,
        }
    }

    /// VMap table, baseline layout only.
    #[must_use]
    pub fn vmap_table(&self) -> Option<&[u8]> {
        match &self.layout {
            ArtifactLayout::Baseline { vmap_table, .. } => Some(vmap_table),
            ArtifactLayout::Optimized { .. } => None,
        }
    }

    /// Native GC map, baseline layout only.
    #[must_use]
    pub fn native_gc_map(&self) -> Option<&[u8]> {
        match &self.layout {
            ArtifactLayout::Baseline { native_gc_map, .. } => Some(native_gc_map),
            ArtifactLayout::Optimized { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_expose_only_their_tables() {
        let optimized =
            CompiledArtifact::optimized(Architecture::X86_64, vec![0xC3], 16, 1 << 16, vec![0, 0], vec![0]);
        assert!(optimized.is_optimized());
        assert_eq!(optimized.stack_map_table(), Some(&[0u8][..]));
        assert_eq!(optimized.vmap_table(), None);
        assert_eq!(optimized.native_gc_map(), None);
        assert_eq!(optimized.fp_spill_mask(), 0);

        let baseline = CompiledArtifact::baseline(
            Architecture::Arm64,
            vec![0; 4],
            32,
            1 << 30,
            vec![0, 0],
            vec![1, 1],
            vec![1, 0, 0, 0],
        );
        assert!(!baseline.is_optimized());
        assert_eq!(baseline.stack_map_table(), None);
        assert_eq!(baseline.vmap_table(), Some(&[1u8, 1][..]));
        assert_eq!(baseline.mapping_table(), &[0, 0]);
    }
}
