// SPDX-License-Identifier: GPL-2.0-or-later

pub mod external;
pub mod logger;
pub mod params;
pub mod stream;
pub mod template;
pub mod time;

pub use external::{DummyNotifier, DummySegmentSink, KeySource, KeySourceError, Notifier, SegmentSink};
pub use logger::{
    ArcLogger, ArcMsgLogger, DummyLogger, DummyMsgLogger, ILogger, LogEntry, LogLevel, MsgLogger,
    new_dummy_msg_logger,
};
pub use params::{
    ChunkingParams, EncryptionParams, Mp4OutputParams, ProtectionSchemeConfig, TsOutputParams,
    WebmOutputParams,
};
pub use stream::{
    AudioInfo, CueEvent, DecryptConfig, EncryptionKey, Iv, MediaEvent, MediaInfo, MediaSample,
    NalFraming, PixelAspectRatio, ProtectionScheme, ProtectionSystemData, SegmentInfo, StreamData,
    StreamDataPayload, StreamInfo, StreamType, Subsample, TextFormat, TextSample, VideoInfo,
    iv_blocks_for_size,
};

pub use sentryshot_padded_bytes::PaddedBytes;
