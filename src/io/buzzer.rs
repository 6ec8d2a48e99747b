//! Buzzer output through the Linux sysfs GPIO and PWM interfaces
//!
//! - Simple buzzer: `/sys/class/gpio/gpio<N>/value` ("1" on, "0" off)
//! - Tonal buzzer: `/sys/class/pwm/pwmchip<C>/pwm<N>/{period,duty_cycle,enable}`
//!   driven at 50% duty cycle
//!
//! Pins are exported on open if the kernel has not exported them yet.

use crate::domain::{Melody, MelodyStep, Tone};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";
const SYSFS_PWM_ROOT: &str = "/sys/class/pwm";

/// Frequency used when a tonal buzzer is asked to simply turn on
const DEFAULT_TONE_HZ: f64 = 440.0;

/// Time the kernel needs to create attribute files after an export
const EXPORT_SETTLE: Duration = Duration::from_millis(100);

#[async_trait]
pub trait Buzzer: Send + Sync {
    /// Sound `tone`, or silence the buzzer when `None`
    async fn set(&self, tone: Option<Tone>) -> io::Result<()>;
}

/// Play a melody step by step; the buzzer is always silenced afterwards
pub async fn play<B: Buzzer + ?Sized>(buzzer: &B, melody: &Melody) -> io::Result<()> {
    let mut result = Ok(());
    for step in melody.steps() {
        match step {
            MelodyStep::Sound(tone) => {
                if let Err(e) = buzzer.set(*tone).await {
                    result = Err(e);
                    break;
                }
            }
            MelodyStep::Wait(duration) => tokio::time::sleep(*duration).await,
        }
    }

    let silenced = buzzer.set(None).await;
    result.and(silenced)
}

async fn export_if_missing(export_file: &Path, exported: &Path, index: u32) -> io::Result<()> {
    if fs::try_exists(exported).await? {
        return Ok(());
    }
    fs::write(export_file, index.to_string()).await?;
    tokio::time::sleep(EXPORT_SETTLE).await;
    debug!(path = %exported.display(), "sysfs_exported");
    Ok(())
}

/// On/off buzzer on a GPIO line
pub struct SysfsBuzzer {
    value_path: PathBuf,
}

impl SysfsBuzzer {
    pub async fn open(pin: u32) -> io::Result<Self> {
        Self::open_in(SYSFS_GPIO_ROOT, pin).await
    }

    pub async fn open_in(root: impl AsRef<Path>, pin: u32) -> io::Result<Self> {
        let root = root.as_ref();
        let line = root.join(format!("gpio{pin}"));
        export_if_missing(&root.join("export"), &line, pin).await?;
        fs::write(line.join("direction"), "out").await?;

        let buzzer = Self { value_path: line.join("value") };
        buzzer.set(None).await?;
        info!(pin = %pin, "buzzer_opened");
        Ok(buzzer)
    }
}

#[async_trait]
impl Buzzer for SysfsBuzzer {
    async fn set(&self, tone: Option<Tone>) -> io::Result<()> {
        let value = if tone.is_some() { "1" } else { "0" };
        fs::write(&self.value_path, value).await
    }
}

/// Pitched buzzer on a PWM channel
pub struct SysfsPwmBuzzer {
    channel: PathBuf,
}

impl SysfsPwmBuzzer {
    pub async fn open(chip: u32, channel: u32) -> io::Result<Self> {
        Self::open_in(SYSFS_PWM_ROOT, chip, channel).await
    }

    pub async fn open_in(root: impl AsRef<Path>, chip: u32, channel: u32) -> io::Result<Self> {
        let chip_dir = root.as_ref().join(format!("pwmchip{chip}"));
        let channel_dir = chip_dir.join(format!("pwm{channel}"));
        export_if_missing(&chip_dir.join("export"), &channel_dir, channel).await?;

        let buzzer = Self { channel: channel_dir };
        buzzer.set(None).await?;
        info!(chip = %chip, channel = %channel, "tonal_buzzer_opened");
        Ok(buzzer)
    }

    async fn write(&self, attribute: &str, value: impl AsRef<[u8]>) -> io::Result<()> {
        fs::write(self.channel.join(attribute), value).await
    }
}

/// Period in nanoseconds for a frequency in Hz
fn period_ns(hz: f64) -> u64 {
    (1_000_000_000.0 / hz).round() as u64
}

#[async_trait]
impl Buzzer for SysfsPwmBuzzer {
    async fn set(&self, tone: Option<Tone>) -> io::Result<()> {
        let hz = match tone {
            None => return self.write("enable", "0").await,
            Some(Tone::On) => DEFAULT_TONE_HZ,
            Some(Tone::Hz(hz)) => hz,
        };

        let period = period_ns(hz);
        // duty_cycle must never exceed period, so clear it before changing period
        self.write("duty_cycle", "0").await?;
        self.write("period", period.to_string()).await?;
        self.write("duty_cycle", (period / 2).to_string()).await?;
        self.write("enable", "1").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BuzzerKind;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingBuzzer {
        calls: Mutex<Vec<Option<Tone>>>,
    }

    #[async_trait]
    impl Buzzer for RecordingBuzzer {
        async fn set(&self, tone: Option<Tone>) -> io::Result<()> {
            self.calls.lock().push(tone);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_runs_steps_and_silences() {
        let buzzer = RecordingBuzzer::default();
        let melody = Melody::parse("X/0.5/-/0.5/X", BuzzerKind::Buzzer).unwrap();

        let start = tokio::time::Instant::now();
        play(&buzzer, &melody).await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(*buzzer.calls.lock(), vec![Some(Tone::On), None, Some(Tone::On), None]);
    }

    #[tokio::test]
    async fn test_sysfs_buzzer_writes_value() {
        let root = tempfile::tempdir().unwrap();
        let line = root.path().join("gpio17");
        std::fs::create_dir(&line).unwrap();

        let buzzer = SysfsBuzzer::open_in(root.path(), 17).await.unwrap();
        assert_eq!(std::fs::read_to_string(line.join("direction")).unwrap(), "out");
        assert_eq!(std::fs::read_to_string(line.join("value")).unwrap(), "0");

        buzzer.set(Some(Tone::On)).await.unwrap();
        assert_eq!(std::fs::read_to_string(line.join("value")).unwrap(), "1");
    }

    #[tokio::test]
    async fn test_sysfs_buzzer_export_fails_without_sysfs() {
        let root = tempfile::tempdir().unwrap();
        // No gpio17 directory appears after writing export, so direction cannot be written
        let result = SysfsBuzzer::open_in(root.path(), 17).await;
        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(root.path().join("export")).unwrap(), "17");
    }

    #[tokio::test]
    async fn test_pwm_buzzer_writes_period_and_duty() {
        let root = tempfile::tempdir().unwrap();
        let channel = root.path().join("pwmchip0").join("pwm1");
        std::fs::create_dir_all(&channel).unwrap();

        let buzzer = SysfsPwmBuzzer::open_in(root.path(), 0, 1).await.unwrap();
        assert_eq!(std::fs::read_to_string(channel.join("enable")).unwrap(), "0");

        buzzer.set(Some(Tone::Hz(440.0))).await.unwrap();
        assert_eq!(std::fs::read_to_string(channel.join("period")).unwrap(), "2272727");
        assert_eq!(std::fs::read_to_string(channel.join("duty_cycle")).unwrap(), "1136363");
        assert_eq!(std::fs::read_to_string(channel.join("enable")).unwrap(), "1");
    }
}
