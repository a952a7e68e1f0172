use log::Level;
use zipkin_trace_view::{logging::Logger, Config, LoggingConfig, ZipkinClient};

// One module per name, each logging from its own module path.
macro_rules! logging_modules {
    ($($name:ident),*) => {
        $(
            mod $name {
                use log::{error, Level, Record};
                use zipkin_trace_view::logging::Logger;

                pub fn test_log() {
                    error!("TEST");
                }

                pub fn format(logger: &Logger) -> Option<String> {
                    logger.format(
                        &Record::builder()
                            .args(format_args!("TEST"))
                            .level(Level::Error)
                            .module_path(Some(module_path!()))
                            .build(),
                    )
                }
            }
        )*
    };
}

logging_modules!(my_test, my_test_start_with, in_the_my_test_middle, ends_with_my_test, shown);

fn config() -> LoggingConfig {
    LoggingConfig {
        level: Level::Error,
        mod_filter: vec!["my_test"],
        ..LoggingConfig::default()
    }
}

#[test]
fn module_filter_matches_anywhere_in_the_path() {
    let logger = Logger::new(config());
    assert_eq!(my_test::format(&logger), None);
    assert_eq!(my_test_start_with::format(&logger), None);
    assert_eq!(in_the_my_test_middle::format(&logger), None);
    assert_eq!(ends_with_my_test::format(&logger), None);

    let line = shown::format(&logger).unwrap();
    assert!(line.ends_with("ERROR [logging_filter::shown] TEST"));
}

// Installs a process-wide logger; run alone and check that only `shown` prints.
#[test]
#[ignore]
fn test_log_filters() {
    let config = Config {
        logging_config: Some(config()),
        ..Default::default()
    };
    let _client = ZipkinClient::new(config);

    my_test::test_log();
    my_test_start_with::test_log();
    ends_with_my_test::test_log();
    in_the_my_test_middle::test_log();
    shown::test_log();
}
