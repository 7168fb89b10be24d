// SPDX-License-Identifier: GPL-2.0-or-later

//! Obtains keys, drives the subsample generator, optionally encrypts
//! sample bytes, and attaches `DecryptConfig` — the single place in the
//! graph that turns a clear track into a protected one.

pub mod codec;
pub mod crypto;
pub mod error;
pub mod label;
pub mod reescape;

pub use error::EncryptionError;

use std::sync::Arc;

use async_trait::async_trait;
use common::time::{Ticks, TickDuration};
use common::{
    DecryptConfig, EncryptionKey, EncryptionParams, Iv, KeySource, MediaEvent, MediaSample,
    Notifier, ProtectionScheme, StreamData, StreamDataPayload, StreamInfo, iv_blocks_for_size,
};
use handler::{ErrorKind, MediaHandler, Ports, SharedHandler, Status};

use crate::codec::TrackCodec;

const PATTERN_CRYPT_BLOCKS: u8 = 1;
const PATTERN_SKIP_BLOCKS: u8 = 9;

fn seconds_to_ticks(seconds: f64, time_scale: u32) -> i64 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        (seconds * f64::from(time_scale)).round() as i64
    }
}

// Picks the IV shape for a freshly rotated key. `cbcs`'s constant-IV
// policy reuses the same 16 bytes for every sample under the key; the
// other CENC-family schemes start a counter from the key's seed and the
// handler advances it per sample.
fn initial_iv(scheme: ProtectionScheme, iv_seed: [u8; 16]) -> Iv {
    match scheme {
        ProtectionScheme::Cbcs => Iv::Constant(iv_seed),
        ProtectionScheme::Cbc1 => Iv::Bytes16(iv_seed),
        ProtectionScheme::Cenc | ProtectionScheme::Cens => {
            let mut counter = [0u8; 8];
            counter.copy_from_slice(&iv_seed[..8]);
            Iv::Bytes8(counter)
        }
        ProtectionScheme::AppleSampleAes => Iv::Bytes16(iv_seed),
    }
}

fn pattern_blocks(scheme: ProtectionScheme, is_video: bool) -> (u8, u8) {
    if scheme.is_pattern() && is_video {
        (PATTERN_CRYPT_BLOCKS, PATTERN_SKIP_BLOCKS)
    } else {
        (0, 0)
    }
}

// Per-track state, created when `StreamInfo` arrives and held for the
// life of the track.
struct Open {
    stream_index: u32,
    is_video: bool,
    time_scale: u32,
    stream_label: String,
    scheme: ProtectionScheme,
    codec: TrackCodec,
    clear_lead_ticks: Option<i64>,
    crypto_period_ticks: Option<i64>,
    stream_start: Option<Ticks>,
    in_clear_lead: bool,
    current_period_index: Option<u64>,
    current_key: Option<EncryptionKey>,
    iv: Option<Iv>,
    // Fresh-per-sample IV source for Apple Sample-AES, independent of key
    // rotation: the key's iv_seed XORed with a monotonic counter.
    apple_sample_counter: u64,
}

impl Open {
    fn period_index(&self, dts: Ticks) -> u64 {
        let Some(period_ticks) = self.crypto_period_ticks else {
            return 0;
        };
        let Some(start) = self.stream_start else {
            return 0;
        };
        let elapsed = (*dts - *start).max(0);
        #[allow(clippy::as_conversions)]
        {
            (elapsed / period_ticks) as u64
        }
    }
}

pub struct EncryptionHandler {
    params: EncryptionParams,
    key_source: Arc<dyn KeySource + Send + Sync>,
    notifier: Arc<dyn Notifier + Send + Sync>,
    stream_label_override: Option<String>,
    ports: Ports,
    open: Option<Open>,
}

impl EncryptionHandler {
    #[must_use]
    pub fn new(
        params: EncryptionParams,
        key_source: Arc<dyn KeySource + Send + Sync>,
        notifier: Arc<dyn Notifier + Send + Sync>,
        stream_label_override: Option<String>,
    ) -> Self {
        Self {
            params,
            key_source,
            notifier,
            stream_label_override,
            ports: Ports::new(),
            open: None,
        }
    }

    async fn forward(&self, stream_index: u32, payload: StreamDataPayload) -> Status {
        self.ports.dispatch(StreamData::new(stream_index, payload)).await
    }

    async fn process_stream_info(&mut self, stream_index: u32, info: Arc<StreamInfo>) -> Status {
        let codec = match codec::resolve(&info) {
            Ok(c) => c,
            Err(e) => return Status::new(ErrorKind::EncryptionError, e.to_string()),
        };
        let scheme: ProtectionScheme = self.params.scheme.into();
        let label = label::resolve(&info, self.stream_label_override.as_deref());
        let clear_lead_ticks = (self.params.clear_lead_s > 0.0)
            .then(|| seconds_to_ticks(self.params.clear_lead_s, info.time_scale));
        let crypto_period_ticks = (self.params.crypto_period_duration_s > 0.0)
            .then(|| seconds_to_ticks(self.params.crypto_period_duration_s, info.time_scale));

        self.open = Some(Open {
            stream_index,
            is_video: info.is_video(),
            time_scale: info.time_scale,
            stream_label: label,
            scheme,
            codec,
            clear_lead_ticks,
            crypto_period_ticks,
            stream_start: None,
            in_clear_lead: clear_lead_ticks.is_some(),
            current_period_index: None,
            current_key: None,
            iv: None,
            apple_sample_counter: 0,
        });

        let out_info = Arc::new(info.as_ref().clone().with_encrypted(true));
        self.forward(stream_index, StreamDataPayload::StreamInfo(out_info)).await
    }

    // Requests a fresh key if `period_index` isn't the one currently
    // cached, then emits the key-update side-band before the sample that
    // triggered the rotation is forwarded.
    async fn ensure_key_for_period(&mut self, period_index: u64) -> Status {
        let Some(open) = self.open.as_ref() else {
            return Status::ok();
        };
        if open.current_period_index == Some(period_index) {
            return Status::ok();
        }
        let label = open.stream_label.clone();
        let key = match self.key_source.key_for_label(&label, period_index).await {
            Ok(k) => k,
            Err(e) => return Status::new(ErrorKind::EncryptionError, e.to_string()),
        };

        let stream_index = open.stream_index;
        let key_id = key.key_id;
        let iv = initial_iv(open.scheme, key.iv_seed);
        if let Some(open) = self.open.as_mut() {
            open.current_period_index = Some(period_index);
            open.current_key = Some(key);
            open.iv = Some(iv);
        }
        self.notifier.media_event(
            stream_index,
            &MediaEvent::KeyUpdate {
                key_id,
                crypto_period_index: period_index,
            },
        );
        Status::ok()
    }

    async fn process_sample(&mut self, stream_index: u32, mut sample: MediaSample) -> Status {
        if self.open.is_none() {
            return Status::new(
                ErrorKind::InvalidArgument,
                "media sample arrived before stream info",
            );
        }
        {
            let open = self.open.as_mut().expect("checked above");
            if open.stream_start.is_none() {
                open.stream_start = Some(sample.dts);
            }
        }

        if self.sample_is_in_clear_lead(&sample) {
            return self.forward(stream_index, StreamDataPayload::MediaSample(sample)).await;
        }

        let period_index = self.open.as_ref().expect("checked above").period_index(sample.dts);
        let status = self.ensure_key_for_period(period_index).await;
        if status.is_error() {
            return status;
        }

        let (scheme, key_id, iv, is_video) = {
            let open = self.open.as_ref().expect("checked above");
            let Some(key) = open.current_key.as_ref() else {
                return Status::new(ErrorKind::EncryptionError, "no key available after rotation");
            };
            let iv = open.iv.expect("set alongside current_key");
            (open.scheme, key.key_id, iv, open.is_video)
        };

        let subsample_codec = self.open.as_ref().expect("checked above").codec.as_subsample_codec();
        let subsamples = match subsample::generate(&subsample_codec, scheme, &sample.payload) {
            Ok(s) => s,
            Err(e) => return Status::new(ErrorKind::EncryptionError, e.to_string()),
        };

        let (crypt_byte_block, skip_byte_block) = pattern_blocks(scheme, is_video);
        let sample_len = sample.len();

        if scheme.is_cenc_family() {
            sample.decrypt_config = Some(DecryptConfig {
                key_id,
                iv,
                subsamples,
                scheme,
                crypt_byte_block,
                skip_byte_block,
            });
            sample.is_encrypted = true;
            self.advance_counter_iv(iv, sample_len);
        } else {
            let status = self.encrypt_apple_sample_aes(&mut sample, key_id, &subsamples);
            if let Err(e) = status {
                return Status::new(ErrorKind::EncryptionError, e.to_string());
            }
        }

        self.forward(stream_index, StreamDataPayload::MediaSample(sample)).await
    }

    fn sample_is_in_clear_lead(&mut self, sample: &MediaSample) -> bool {
        let Some(open) = self.open.as_mut() else {
            return false;
        };
        if !open.in_clear_lead {
            return false;
        }
        let Some(lead_ticks) = open.clear_lead_ticks else {
            open.in_clear_lead = false;
            return false;
        };
        let start = open.stream_start.unwrap_or(sample.dts);
        let boundary = start
            .checked_add(TickDuration::new(lead_ticks))
            .unwrap_or(start);
        let past_boundary = sample.dts >= boundary;
        let can_start = past_boundary && (!open.is_video || sample.is_key_frame);
        if can_start {
            open.in_clear_lead = false;
            false
        } else {
            true
        }
    }

    fn advance_counter_iv(&mut self, iv: Iv, sample_len: usize) {
        let Some(open) = self.open.as_mut() else {
            return;
        };
        let blocks = iv_blocks_for_size(sample_len);
        open.iv = Some(iv.incremented(blocks));
    }

    fn encrypt_apple_sample_aes(
        &mut self,
        sample: &mut MediaSample,
        key_id: [u8; 16],
        subsamples: &[common::Subsample],
    ) -> Result<(), EncryptionError> {
        let Some(open) = self.open.as_mut() else {
            return Ok(());
        };
        let Some(key) = open.current_key.as_ref() else {
            return Ok(());
        };
        let counter = open.apple_sample_counter;
        open.apple_sample_counter += 1;
        let mut iv_bytes = key.iv_seed;
        let counter_bytes = counter.to_be_bytes();
        for (b, c) in iv_bytes[8..].iter_mut().zip(counter_bytes.iter()) {
            *b ^= c;
        }
        let iv = Iv::Bytes16(iv_bytes);

        let mut bytes = sample.payload.to_vec();
        crypto::encrypt_in_place(&key.key, &iv, &mut bytes, subsamples)?;
        let reescaped = match open.codec.nal_length_size() {
            Some(nal_length_size) => reescape::reescape_length_prefixed(&bytes, nal_length_size)?,
            None => bytes,
        };

        sample.payload = Arc::new(common::PaddedBytes::new(reescaped));
        sample.is_encrypted = true;
        sample.decrypt_config = Some(DecryptConfig {
            key_id,
            iv,
            subsamples: subsamples.to_vec(),
            scheme: ProtectionScheme::AppleSampleAes,
            crypt_byte_block: 0,
            skip_byte_block: 0,
        });
        Ok(())
    }
}

#[async_trait]
impl MediaHandler for EncryptionHandler {
    async fn process(&mut self, input_port: u32, data: StreamData) -> Status {
        if input_port != 0 {
            return Status::new(
                ErrorKind::InvalidArgument,
                format!("encryption handler has no input port {input_port}"),
            );
        }
        match data.payload {
            StreamDataPayload::StreamInfo(info) => self.process_stream_info(data.stream_index, info).await,
            StreamDataPayload::MediaSample(sample) => self.process_sample(data.stream_index, sample).await,
            other => self.forward(data.stream_index, other).await,
        }
    }

    async fn on_flush_request(&mut self, input_port: u32) -> Status {
        if input_port != 0 {
            return Status::new(
                ErrorKind::InvalidArgument,
                format!("encryption handler has no input port {input_port}"),
            );
        }
        self.ports.flush_all().await
    }

    fn add_output(&mut self, output_port: u32, consumer: SharedHandler, consumer_input_port: u32) {
        self.ports.add_output(output_port, consumer, consumer_input_port);
    }

    fn known_input_ports(&self) -> Vec<u32> {
        vec![0]
    }

    fn declared_output_ports(&self) -> Vec<u32> {
        vec![0]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use common::time::TickDuration;
    use common::{
        AudioInfo, KeySourceError, MediaInfo, PaddedBytes, ProtectionSchemeConfig, StreamType,
        VideoInfo,
    };
    use tokio::sync::Mutex;

    use super::*;

    struct Recorder {
        events: Vec<StreamDataPayload>,
    }

    #[async_trait]
    impl MediaHandler for Recorder {
        async fn process(&mut self, _input_port: u32, data: StreamData) -> Status {
            self.events.push(data.payload);
            Status::ok()
        }
        async fn on_flush_request(&mut self, _input_port: u32) -> Status {
            Status::ok()
        }
        fn add_output(&mut self, _output_port: u32, _consumer: SharedHandler, _consumer_input_port: u32) {}
        fn known_input_ports(&self) -> Vec<u32> {
            vec![0]
        }
        fn declared_output_ports(&self) -> Vec<u32> {
            vec![]
        }
    }

    struct FixedKeySource {
        key: EncryptionKey,
    }

    #[async_trait]
    impl KeySource for FixedKeySource {
        async fn key_for_label(
            &self,
            _stream_label: &str,
            _crypto_period_index: u64,
        ) -> Result<EncryptionKey, KeySourceError> {
            Ok(self.key.clone())
        }
    }

    struct NoKeySource;

    #[async_trait]
    impl KeySource for NoKeySource {
        async fn key_for_label(
            &self,
            stream_label: &str,
            _crypto_period_index: u64,
        ) -> Result<EncryptionKey, KeySourceError> {
            Err(KeySourceError(stream_label.to_owned()))
        }
    }

    struct EventRecorder {
        events: std::sync::Mutex<Vec<(u32, MediaEvent)>>,
    }

    impl Notifier for EventRecorder {
        fn segment_ready(&self, _stream_index: u32, _segment_number: u64) {}
        fn media_event(&self, stream_index: u32, event: &MediaEvent) {
            self.events.lock().unwrap().push((stream_index, event.clone()));
        }
    }

    fn key(byte: u8) -> EncryptionKey {
        EncryptionKey {
            key_id: [byte; 16],
            key: [byte; 16],
            iv_seed: [byte; 16],
            protection_system_data: Vec::new(),
        }
    }

    fn params(scheme: ProtectionSchemeConfig, clear_lead_s: f64, crypto_period_s: f64) -> EncryptionParams {
        EncryptionParams {
            scheme,
            clear_lead_s,
            crypto_period_duration_s: crypto_period_s,
            vp9_subsample_encryption: true,
            protection_systems: Vec::new(),
        }
    }

    fn video_info(time_scale: u32) -> Arc<StreamInfo> {
        Arc::new(StreamInfo {
            stream_type: StreamType::Video,
            codec: "other".to_owned(),
            codec_private: Vec::new(),
            time_scale,
            duration: TickDuration::new(0),
            language: "und".to_owned(),
            encrypted: false,
            media: MediaInfo::Video(VideoInfo {
                width: 1920,
                height: 1080,
                ..VideoInfo::default()
            }),
        })
    }

    fn audio_info(time_scale: u32) -> Arc<StreamInfo> {
        Arc::new(StreamInfo {
            stream_type: StreamType::Audio,
            codec: "aac".to_owned(),
            codec_private: Vec::new(),
            time_scale,
            duration: TickDuration::new(0),
            language: "und".to_owned(),
            encrypted: false,
            media: MediaInfo::Audio(AudioInfo::default()),
        })
    }

    fn sample(dts: i64, duration: i64, is_key_frame: bool, payload: Vec<u8>) -> MediaSample {
        MediaSample {
            dts: Ticks::new(dts),
            pts: Ticks::new(dts),
            duration: TickDuration::new(duration),
            is_key_frame,
            is_encrypted: false,
            payload: Arc::new(PaddedBytes::new(payload)),
            side_data: None,
            decrypt_config: None,
        }
    }

    fn samples_of(events: &[StreamDataPayload]) -> Vec<MediaSample> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamDataPayload::MediaSample(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn samples_before_the_clear_lead_boundary_pass_through_unencrypted() {
        let mut handler = EncryptionHandler::new(
            params(ProtectionSchemeConfig::Cenc, 1.0, 0.0),
            Arc::new(FixedKeySource { key: key(1) }),
            Arc::new(EventRecorder {
                events: std::sync::Mutex::new(Vec::new()),
            }),
            None,
        );
        let recorder = Arc::new(Mutex::new(Recorder { events: Vec::new() }));
        handler.add_output(0, recorder.clone(), 0);

        handler
            .process(0, StreamData::new(0, StreamDataPayload::StreamInfo(audio_info(1000))))
            .await;
        for dts in [0, 500, 1000, 2500] {
            let status = handler
                .process(
                    0,
                    StreamData::new(0, StreamDataPayload::MediaSample(sample(dts, 500, true, vec![0u8; 32]))),
                )
                .await;
            assert!(status.is_ok(), "{status}");
        }

        let events = recorder.lock().await.events.clone();
        let samples = samples_of(&events);
        assert_eq!(4, samples.len());
        assert!(!samples[0].is_encrypted, "before the boundary");
        assert!(!samples[1].is_encrypted, "still before the boundary");
        assert!(samples[2].is_encrypted, "dts 1000 == 1s boundary at 1000 scale");
        assert!(samples[3].is_encrypted);
    }

    #[tokio::test]
    async fn video_clear_lead_waits_for_a_key_frame_at_or_after_the_boundary() {
        let mut handler = EncryptionHandler::new(
            params(ProtectionSchemeConfig::Cbcs, 1.0, 0.0),
            Arc::new(FixedKeySource { key: key(2) }),
            Arc::new(EventRecorder {
                events: std::sync::Mutex::new(Vec::new()),
            }),
            None,
        );
        let recorder = Arc::new(Mutex::new(Recorder { events: Vec::new() }));
        handler.add_output(0, recorder.clone(), 0);

        handler
            .process(0, StreamData::new(0, StreamDataPayload::StreamInfo(video_info(1000))))
            .await;
        // dts 1000 is past the 1s boundary but not a key frame; encryption
        // must wait for the next key frame.
        for (dts, is_key) in [(0, true), (500, false), (1000, false), (1500, true), (2000, false)] {
            handler
                .process(
                    0,
                    StreamData::new(
                        0,
                        StreamDataPayload::MediaSample(sample(dts, 500, is_key, vec![0u8; 32])),
                    ),
                )
                .await;
        }

        let events = recorder.lock().await.events.clone();
        let samples = samples_of(&events);
        assert_eq!(5, samples.len());
        assert!(!samples[0].is_encrypted);
        assert!(!samples[1].is_encrypted);
        assert!(!samples[2].is_encrypted, "past the boundary but not a key frame");
        assert!(samples[3].is_encrypted, "first key frame at/after the boundary");
        assert!(samples[4].is_encrypted, "encryption continues on later non-key frames");
        let cfg = samples[3].decrypt_config.as_ref().unwrap();
        assert_eq!((1, 9), (cfg.crypt_byte_block, cfg.skip_byte_block), "cbcs pattern on video");
    }

    #[tokio::test]
    async fn cenc_attaches_decrypt_config_without_touching_payload() {
        let mut handler = EncryptionHandler::new(
            params(ProtectionSchemeConfig::Cenc, 0.0, 0.0),
            Arc::new(FixedKeySource { key: key(7) }),
            Arc::new(EventRecorder {
                events: std::sync::Mutex::new(Vec::new()),
            }),
            None,
        );
        let recorder = Arc::new(Mutex::new(Recorder { events: Vec::new() }));
        handler.add_output(0, recorder.clone(), 0);

        handler
            .process(0, StreamData::new(0, StreamDataPayload::StreamInfo(audio_info(48_000))))
            .await;
        let original_payload = vec![0xABu8; 40];
        handler
            .process(
                0,
                StreamData::new(
                    0,
                    StreamDataPayload::MediaSample(sample(0, 1024, true, original_payload.clone())),
                ),
            )
            .await;

        let events = recorder.lock().await.events.clone();
        let samples = samples_of(&events);
        assert_eq!(1, samples.len());
        assert!(samples[0].is_encrypted);
        assert_eq!(&original_payload[..], &samples[0].payload[..], "container does the AES, not us");
        let cfg = samples[0].decrypt_config.as_ref().unwrap();
        assert_eq!([7u8; 16], cfg.key_id);
        assert_eq!(ProtectionScheme::Cenc, cfg.scheme);
    }

    #[tokio::test]
    async fn key_rotation_emits_key_update_before_the_triggering_sample() {
        let notifier = Arc::new(EventRecorder {
            events: std::sync::Mutex::new(Vec::new()),
        });
        let mut handler = EncryptionHandler::new(
            params(ProtectionSchemeConfig::Cenc, 0.0, 1.0),
            Arc::new(FixedKeySource { key: key(3) }),
            notifier.clone(),
            None,
        );
        let recorder = Arc::new(Mutex::new(Recorder { events: Vec::new() }));
        handler.add_output(0, recorder.clone(), 0);

        handler
            .process(0, StreamData::new(0, StreamDataPayload::StreamInfo(audio_info(1000))))
            .await;
        for dts in [0, 500, 1000, 1500] {
            handler
                .process(
                    0,
                    StreamData::new(0, StreamDataPayload::MediaSample(sample(dts, 500, true, vec![0u8; 16]))),
                )
                .await;
        }

        let key_updates = notifier.events.lock().unwrap().clone();
        assert_eq!(2, key_updates.len(), "one rotation at period 0 -> 1");
    }

    #[tokio::test]
    async fn missing_key_is_fatal() {
        let mut handler = EncryptionHandler::new(
            params(ProtectionSchemeConfig::Cenc, 0.0, 0.0),
            Arc::new(NoKeySource),
            Arc::new(EventRecorder {
                events: std::sync::Mutex::new(Vec::new()),
            }),
            None,
        );
        let recorder = Arc::new(Mutex::new(Recorder { events: Vec::new() }));
        handler.add_output(0, recorder.clone(), 0);

        handler
            .process(0, StreamData::new(0, StreamDataPayload::StreamInfo(audio_info(1000))))
            .await;
        let status = handler
            .process(
                0,
                StreamData::new(0, StreamDataPayload::MediaSample(sample(0, 500, true, vec![0u8; 16]))),
            )
            .await;
        assert_eq!(ErrorKind::EncryptionError, status.kind);
    }

    #[tokio::test]
    async fn apple_sample_aes_encrypts_payload_in_place() {
        let mut handler = EncryptionHandler::new(
            params(ProtectionSchemeConfig::AppleSampleAes, 0.0, 0.0),
            Arc::new(FixedKeySource { key: key(9) }),
            Arc::new(EventRecorder {
                events: std::sync::Mutex::new(Vec::new()),
            }),
            None,
        );
        let recorder = Arc::new(Mutex::new(Recorder { events: Vec::new() }));
        handler.add_output(0, recorder.clone(), 0);

        handler
            .process(0, StreamData::new(0, StreamDataPayload::StreamInfo(audio_info(48_000))))
            .await;
        let original_payload = vec![0x11u8; 64];
        handler
            .process(
                0,
                StreamData::new(
                    0,
                    StreamDataPayload::MediaSample(sample(0, 1024, true, original_payload.clone())),
                ),
            )
            .await;

        let events = recorder.lock().await.events.clone();
        let samples = samples_of(&events);
        assert_eq!(1, samples.len());
        assert!(samples[0].is_encrypted);
        assert_ne!(
            &original_payload[16..],
            &samples[0].payload[16..],
            "bytes past the clear AAC prefix are ciphertext"
        );
        assert_eq!(
            &original_payload[..16],
            &samples[0].payload[..16],
            "clear AAC prefix is untouched"
        );
    }
}
