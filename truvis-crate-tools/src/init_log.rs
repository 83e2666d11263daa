use std::io::Write;

fn builder(filter: log::LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                _ => buf.default_level_style(record.level()),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));
            let black_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(75, 75, 75))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(['\\', '/']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S");
            let level = record.level();

            writeln!(
                buf,
                "{level_style}[{time}] {level}{level_style:#} {grey_style}[{file}:{line}]{grey_style:#} \
                 {black_style}{}{black_style:#}",
                record.args()
            )
        })
        .filter(None, filter);
    builder
}

/// 应用启动时调用一次，`RUST_LOG` 可以覆盖默认的 Info 级别
pub fn init_log() {
    let mut builder = builder(log::LevelFilter::Info);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

/// 测试中使用，可以重复调用；输出交给 libtest 捕获
pub fn init_test_log() {
    let _ = builder(log::LevelFilter::Debug).is_test(true).try_init();
}
