//! Audio output subsystem

pub mod analyser;
pub mod device;
pub mod mixer;
pub mod output;
pub mod pcm;
pub mod scheduler;

pub use analyser::{create_shared_analyser, AnalyserTap, Levels, SharedAnalyser};
pub use device::{list_devices, get_device_by_id, AudioDeviceInfo, CpalOutput, CpalOutputFactory};
pub use output::{AudioOutput, OutputFactory, SourceId};
pub use pcm::{pcm_to_stereo, StereoBuffer};
pub use scheduler::{PcmScheduler, ScheduledBuffer};
