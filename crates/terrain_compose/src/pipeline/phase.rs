//! The six ordered compositing phases.
use crate::layer::LayerKind;

/// One compositing phase. The derived ordering is execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    HeightMask,
    HeightComposite,
    TextureMask,
    TextureComposite,
    FeatureMask,
    FeatureApplication,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::HeightMask,
        Phase::HeightComposite,
        Phase::TextureMask,
        Phase::TextureComposite,
        Phase::FeatureMask,
        Phase::FeatureApplication,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<Phase> {
        Phase::ALL.get(self.index() + 1).copied()
    }

    pub fn previous(self) -> Option<Phase> {
        self.index().checked_sub(1).map(|i| Phase::ALL[i])
    }

    /// Layer kind whose work runs in this phase.
    pub fn kind(self) -> LayerKind {
        match self {
            Phase::HeightMask | Phase::HeightComposite => LayerKind::Height,
            Phase::TextureMask | Phase::TextureComposite => LayerKind::Texture,
            Phase::FeatureMask | Phase::FeatureApplication => LayerKind::Feature,
        }
    }

    /// Mask phases produce per-layer buffers; the others write region buffers.
    pub fn is_mask(self) -> bool {
        matches!(
            self,
            Phase::HeightMask | Phase::TextureMask | Phase::FeatureMask
        )
    }

    pub fn mask_of(kind: LayerKind) -> Phase {
        match kind {
            LayerKind::Height => Phase::HeightMask,
            LayerKind::Texture => Phase::TextureMask,
            LayerKind::Feature => Phase::FeatureMask,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::HeightMask => "height_mask",
            Phase::HeightComposite => "height_composite",
            Phase::TextureMask => "texture_mask",
            Phase::TextureComposite => "texture_composite",
            Phase::FeatureMask => "feature_mask",
            Phase::FeatureApplication => "feature_application",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
