#[cfg(feature = "log")]
pub mod rust_log {
    //! Routes records of the `log` crate through a [`Logger`].
    //!
    //! ```rust
    //! use pinolog::{Logger, rust_log};
    //!
    //! rust_log::init(Logger::default()).unwrap();
    //! log::info!(user = "bob"; "signed in");
    //! ```

    use log::kv::{self, Key, VisitSource};
    use log::{Log, Metadata, Record, SetLoggerError};
    use serde_json::{Map, Value};

    use crate::level::Severity;
    use crate::logger::Logger;

    /// [`log::Log`] implementation writing pino records. Key-values attached
    /// to a record become top-level fields.
    #[derive(Debug, Clone)]
    pub struct LogBridge {
        logger: Logger,
    }

    impl LogBridge {
        pub fn new(logger: Logger) -> Self {
            LogBridge { logger }
        }

        pub fn logger(&self) -> &Logger {
            &self.logger
        }
    }

    impl Log for LogBridge {
        fn enabled(&self, metadata: &Metadata) -> bool {
            self.logger.enabled(metadata.level().into())
        }

        fn log(&self, record: &Record) {
            let entry = self.logger.entry(Severity::from(record.level()));
            if !entry.enabled() {
                return;
            }

            let mut fields = Map::new();
            // a failing source just loses its remaining pairs
            let _ = record.key_values().visit(&mut Collector(&mut fields));
            entry.extend(fields).msg(record.args());
        }

        fn flush(&self) {
            self.logger.flush()
        }
    }

    /// Installs `logger` as the global `log` backend and sets the max level
    /// from its threshold.
    pub fn init(logger: Logger) -> Result<(), SetLoggerError> {
        let max_level = log::LevelFilter::from(logger.level());
        log::set_boxed_logger(Box::new(LogBridge::new(logger)))?;
        log::set_max_level(max_level);
        Ok(())
    }

    struct Collector<'m>(&'m mut Map<String, Value>);

    impl<'kvs> VisitSource<'kvs> for Collector<'_> {
        fn visit_pair(&mut self, key: Key<'kvs>, value: kv::Value<'kvs>) -> Result<(), kv::Error> {
            self.0.insert(key.as_str().to_string(), to_json(&value));
            Ok(())
        }
    }

    fn to_json(value: &kv::Value<'_>) -> Value {
        if let Some(v) = value.to_bool() {
            Value::from(v)
        } else if let Some(v) = value.to_u64() {
            Value::from(v)
        } else if let Some(v) = value.to_i64() {
            Value::from(v)
        } else if let Some(v) = value.to_f64() {
            Value::from(v)
        } else if let Some(v) = value.to_borrowed_str() {
            Value::from(v)
        } else {
            Value::String(value.to_string())
        }
    }

}
