//! Speech codec seam

use fathom_qoa::{Lms, MAX_FRAME_SAMPLES};

use crate::error::Result;

/// Compresses and decompresses single voice frames.
///
/// Frames are independent: a decoder must be able to start at any frame,
/// since readers skip frames that arrive late or not at all.
pub trait SpeechCodec: Send + Sync {
    /// Encode one frame of mono PCM, appending the packet to `out`.
    fn encode(&self, pcm: &[i16], out: &mut Vec<u8>) -> Result<()>;

    /// Decode one packet, appending samples to `out`. Returns the sample count.
    fn decode(&self, packet: &[u8], out: &mut Vec<i16>) -> Result<usize>;
}

/// Default codec: QOA-style frames from `fathom-qoa` (about 5:1)
#[derive(Debug, Default, Clone, Copy)]
pub struct QoaCodec;

impl SpeechCodec for QoaCodec {
    fn encode(&self, pcm: &[i16], out: &mut Vec<u8>) -> Result<()> {
        let mut lms = Lms::default();
        for frame in pcm.chunks(MAX_FRAME_SAMPLES) {
            fathom_qoa::encode_frame(frame, &mut lms, out);
        }
        Ok(())
    }

    fn decode(&self, packet: &[u8], out: &mut Vec<i16>) -> Result<usize> {
        Ok(fathom_qoa::decode(packet, out)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AudioError;

    #[test]
    fn test_qoa_codec_frame() {
        let pcm: Vec<i16> = (0..960).map(|i| ((i % 48) as i16 - 24) * 300).collect();
        let mut packet = Vec::new();
        QoaCodec.encode(&pcm, &mut packet).unwrap();
        assert!(packet.len() < pcm.len() * 2 / 4);

        let mut decoded = Vec::new();
        assert_eq!(QoaCodec.decode(&packet, &mut decoded).unwrap(), 960);
    }

    #[test]
    fn test_corrupt_packet_is_codec_error() {
        let mut decoded = Vec::new();
        let result = QoaCodec.decode(&[0xFF; 7], &mut decoded);
        assert!(matches!(result, Err(AudioError::Codec(_))));
    }
}
