use serde::{Deserialize, Serialize};

/// A "voice command" — a non-timed event that changes channel or global
/// engine state (§3.3). Variant identity doubles as the internal/common
/// VCMD id (before any engine-specific remap is applied).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vcmd {
    Inst { instrument: u8 },
    Panning { panning: u8 },
    PanFade { time: u8, target: u8 },
    VibratoOn { delay: u8, rate: u8, depth: u8 },
    VibratoOff,
    GlobalVolume { volume: u8 },
    GlobalVolumeFade { time: u8, target: u8 },
    Tempo { tempo: u8 },
    TempoFade { time: u8, target: u8 },
    GlobalTranspose { semitones: i8 },
    PerVoiceTranspose { semitones: i8 },
    TremoloOn { delay: u8, rate: u8, depth: u8 },
    TremoloOff,
    Volume { volume: u8 },
    VolumeFade { time: u8, target: u8 },
    SubroutineCall { subroutine_id: i32, original_addr: u16, count: u8 },
    VibratoFadeIn { time: u8 },
    PitchEnvelopeTo { delay: u8, length: u8, semitone: u8 },
    PitchEnvelopeFrom { delay: u8, length: u8, semitone: u8 },
    PitchEnvelopeOff,
    FineTune { semitones: i8 },
    EchoOn { channels: u8, left: u8, right: u8 },
    EchoOff,
    EchoParams { delay: u8, feedback: u8, fir_index: u8 },
    EchoVolumeFade { time: u8, left_target: u8, right_target: u8 },
    PitchSlideToNote { delay: u8, length: u8, note: u8 },
    PercussionBaseInstrument { index: u8 },
    /// Variable-byte filler. `nop_bytes` is the raw byte count consumed at
    /// parse time and re-emitted verbatim on compile (§3.3).
    Nop { nop_bytes: u16 },
    MuteChannel,
    FastForwardOn,
    FastForwardOff,
    /// Engine extension command, gated behind `extension_vcmd_prefix` (§3.1, §3.3).
    Extension { id: u8, params: [u8; 4], param_count: u8 },
}

impl Vcmd {
    /// Default internal VCMD id for this variant (before any engine remap), or
    /// `None` for `Extension` (which has no fixed common id — its id is the
    /// extension-specific byte carried in the variant itself).
    pub fn default_id(&self) -> Option<u8> {
        use Vcmd::*;
        Some(match self {
            Inst { .. } => 0xE0,
            Panning { .. } => 0xE1,
            PanFade { .. } => 0xE2,
            VibratoOn { .. } => 0xE3,
            VibratoOff => 0xE4,
            GlobalVolume { .. } => 0xE5,
            GlobalVolumeFade { .. } => 0xE6,
            Tempo { .. } => 0xE7,
            TempoFade { .. } => 0xE8,
            GlobalTranspose { .. } => 0xE9,
            PerVoiceTranspose { .. } => 0xEA,
            TremoloOn { .. } => 0xEB,
            TremoloOff => 0xEC,
            Volume { .. } => 0xED,
            VolumeFade { .. } => 0xEE,
            SubroutineCall { .. } => 0xEF,
            VibratoFadeIn { .. } => 0xF0,
            PitchEnvelopeTo { .. } => 0xF1,
            PitchEnvelopeFrom { .. } => 0xF2,
            PitchEnvelopeOff => 0xF3,
            FineTune { .. } => 0xF4,
            EchoOn { .. } => 0xF5,
            EchoOff => 0xF6,
            EchoParams { .. } => 0xF7,
            EchoVolumeFade { .. } => 0xF8,
            PitchSlideToNote { .. } => 0xF9,
            PercussionBaseInstrument { .. } => 0xFA,
            Nop { .. } => 0xFB,
            MuteChannel => 0xFC,
            FastForwardOn => 0xFD,
            FastForwardOff => 0xFE,
            Extension { .. } => return None,
        })
    }

    /// True for `Inst` — the editor treats instrument select specially (§4.3.6).
    pub fn is_instrument(&self) -> bool {
        matches!(self, Vcmd::Inst { .. })
    }

    /// True for `Volume` — the editor treats (local) volume specially (§4.3.6).
    pub fn is_volume(&self) -> bool {
        matches!(self, Vcmd::Volume { .. })
    }

    /// True for `SubroutineCall` — preserved by default during effect-clear ops (§4.3.7).
    pub fn is_subroutine_call(&self) -> bool {
        matches!(self, Vcmd::SubroutineCall { .. })
    }

    /// An "effect" is any VCMD that is neither `Inst` nor `Volume` (§4.3.7).
    pub fn is_effect(&self) -> bool {
        !self.is_instrument() && !self.is_volume()
    }

    /// Number of parameter bytes that follow the opcode byte, not counting the
    /// opcode itself (§3.3). For `SubroutineCall` this is the 2-byte address
    /// plus the 1-byte count (3). For `Nop` it is `nop_bytes` itself (the
    /// filler IS the parameter payload). For `Extension` it is `param_count`.
    pub fn param_byte_count(&self) -> usize {
        use Vcmd::*;
        match self {
            Inst { .. } => 1,
            Panning { .. } => 1,
            PanFade { .. } => 2,
            VibratoOn { .. } => 3,
            VibratoOff => 0,
            GlobalVolume { .. } => 1,
            GlobalVolumeFade { .. } => 2,
            Tempo { .. } => 1,
            TempoFade { .. } => 2,
            GlobalTranspose { .. } => 1,
            PerVoiceTranspose { .. } => 1,
            TremoloOn { .. } => 3,
            TremoloOff => 0,
            Volume { .. } => 1,
            VolumeFade { .. } => 2,
            SubroutineCall { .. } => 3,
            VibratoFadeIn { .. } => 1,
            PitchEnvelopeTo { .. } => 3,
            PitchEnvelopeFrom { .. } => 3,
            PitchEnvelopeOff => 0,
            FineTune { .. } => 1,
            EchoOn { .. } => 3,
            EchoOff => 0,
            EchoParams { .. } => 3,
            EchoVolumeFade { .. } => 3,
            PitchSlideToNote { .. } => 3,
            PercussionBaseInstrument { .. } => 1,
            Nop { nop_bytes } => *nop_bytes as usize,
            MuteChannel => 0,
            FastForwardOn => 0,
            FastForwardOff => 0,
            Extension { param_count, .. } => *param_count as usize,
        }
    }

    /// 3-character display abbreviation, used by host UIs for the effect column (§3.3, §4.8).
    pub fn short_name(&self) -> &'static str {
        use Vcmd::*;
        match self {
            Inst { .. } => "Ins",
            Panning { .. } => "Pan",
            PanFade { .. } => "PFa",
            VibratoOn { .. } => "VOn",
            VibratoOff => "VOf",
            GlobalVolume { .. } => "GVl",
            GlobalVolumeFade { .. } => "GVF",
            Tempo { .. } => "Tmp",
            TempoFade { .. } => "TmF",
            GlobalTranspose { .. } => "GTr",
            PerVoiceTranspose { .. } => "PTr",
            TremoloOn { .. } => "TOn",
            TremoloOff => "TOf",
            Volume { .. } => "Vol",
            VolumeFade { .. } => "VFd",
            SubroutineCall { .. } => "Cal",
            VibratoFadeIn { .. } => "Vfi",
            PitchEnvelopeTo { .. } => "PEt",
            PitchEnvelopeFrom { .. } => "PEf",
            PitchEnvelopeOff => "PEo",
            FineTune { .. } => "FTn",
            EchoOn { .. } => "EOn",
            EchoOff => "EOf",
            EchoParams { .. } => "EPr",
            EchoVolumeFade { .. } => "EVF",
            PitchSlideToNote { .. } => "PSt",
            PercussionBaseInstrument { .. } => "PIn",
            Nop { .. } => "NOP",
            MuteChannel => "MCh",
            FastForwardOn => "FFo",
            FastForwardOff => "FFf",
            Extension { .. } => "Ext",
        }
    }
}
