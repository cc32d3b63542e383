//! Tensorboard event logging.

use crate::{common::*, utils};
use std::{fs::File, io::BufWriter};

/// Loss values of a training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepLog {
    pub rpn_cls: f64,
    pub rpn_box: f64,
    pub cls: f64,
    pub bbox: f64,
    pub reid: f64,
    pub total: f64,
    pub average: f64,
    pub lr: f64,
}

/// Writes training scalars as tensorboard events.
#[derive(Debug)]
pub struct EventLogger {
    event_writer: Option<EventWriter<BufWriter<File>>>,
}

impl EventLogger {
    /// Creates an event file under `out_dir/events/<timestamp>/`.
    pub fn new(out_dir: &Path) -> Result<Self> {
        let event_dir = out_dir
            .join("events")
            .join(format!("{}", Local::now().format(utils::FILE_STRFTIME)));
        fs::create_dir_all(&event_dir)?;

        let event_path_prefix = event_dir
            .join("sipn")
            .into_os_string()
            .into_string()
            .map_err(|path| format_err!("non-UTF-8 event path {:?}", path))?;
        let event_writer = EventWriterInit::default().from_prefix(event_path_prefix, None)?;
        info!("write tensorboard events to '{}'", event_dir.display());

        Ok(Self {
            event_writer: Some(event_writer),
        })
    }

    /// Creates a logger that discards everything.
    pub fn disabled() -> Self {
        Self { event_writer: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.event_writer.is_some()
    }

    pub fn log_step(&mut self, step: i64, log: &StepLog) -> Result<()> {
        let event_writer = match &mut self.event_writer {
            Some(event_writer) => event_writer,
            None => return Ok(()),
        };

        let StepLog {
            rpn_cls,
            rpn_box,
            cls,
            bbox,
            reid,
            total,
            average,
            lr,
        } = *log;

        for (tag, value) in [
            ("loss/rpn_cls", rpn_cls),
            ("loss/rpn_box", rpn_box),
            ("loss/cls", cls),
            ("loss/bbox", bbox),
            ("loss/reid", reid),
            ("loss/total", total),
            ("loss/average", average),
            ("params/learning_rate", lr),
        ] {
            event_writer.write_scalar(tag, step, value as f32)?;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(event_writer) = &mut self.event_writer {
            event_writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_events() -> Result<()> {
        let out_dir = std::env::temp_dir().join(format!("sipn-events-{}", std::process::id()));
        let mut logger = EventLogger::new(&out_dir)?;
        assert!(logger.is_enabled());

        let log = StepLog {
            rpn_cls: 0.5,
            rpn_box: 0.1,
            cls: 0.4,
            bbox: 0.2,
            reid: 0.3,
            total: 1.5,
            average: 1.5,
            lr: 1e-5,
        };
        logger.log_step(0, &log)?;
        logger.log_step(1, &log)?;
        logger.flush()?;

        let event_files: Vec<PathBuf> =
            glob::glob(&format!("{}/events/*/sipn*", out_dir.display()))?.try_collect()?;
        assert_eq!(event_files.len(), 1);
        assert!(fs::metadata(&event_files[0])?.len() > 0);

        fs::remove_dir_all(&out_dir)?;
        Ok(())
    }

    #[test]
    fn disabled_logger_writes_nothing() -> Result<()> {
        let mut logger = EventLogger::disabled();
        assert!(!logger.is_enabled());
        logger.log_step(
            0,
            &StepLog {
                rpn_cls: 0.0,
                rpn_box: 0.0,
                cls: 0.0,
                bbox: 0.0,
                reid: 0.0,
                total: 0.0,
                average: 0.0,
                lr: 0.0,
            },
        )?;
        Ok(())
    }
}
