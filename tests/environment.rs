use std::ffi::CString;
use std::io;
use std::sync::{Arc, Mutex};

use gdal::DriverManager;
use gdal_sys::{CPLErr, CPLError, GDALGetCacheMax64};
use gtiff2tiles::{Environment, EnvironmentOptions};

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

fn raise(class: CPLErr::Type, number: i32, message: &str) {
    let message = CString::new(message).unwrap();
    unsafe { CPLError(class, number, message.as_ptr()) };
}

#[test]
fn environment_configures_gdal() {
    // The GDAL error handler is process-wide, so every scenario runs in
    // this one test.
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .with_writer(move || writer.clone())
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let env = Environment::init(EnvironmentOptions::default()).unwrap();
        assert!(!env.options().quiet_gdal);
        raise(CPLErr::CE_Failure, 42, "decoder exploded");
        raise(CPLErr::CE_Warning, 1, "odd georeferencing");

        Environment::init(EnvironmentOptions {
            quiet_gdal: true,
            ..EnvironmentOptions::default()
        })
        .unwrap();
        raise(CPLErr::CE_Failure, 7, "silenced message");
    });

    let text = captured.text();
    assert!(text.contains("ERROR gdal"), "{text}");
    assert!(text.contains("decoder exploded"), "{text}");
    assert!(text.contains("WARN gdal"), "{text}");
    assert!(text.contains("odd georeferencing"), "{text}");
    assert!(!text.contains("silenced message"), "{text}");

    // GDAL reads GDAL_CACHEMAX once, on first use of its block cache; the
    // size must still change afterwards.
    let initial = unsafe { GDALGetCacheMax64() };
    let requested = 48 * 1024 * 1024;
    assert_ne!(initial, requested);
    let env = Environment::init(EnvironmentOptions {
        gdal_cache_bytes: Some(requested as usize),
        quiet_gdal: true,
    })
    .unwrap();
    assert_eq!(env.options().gdal_cache_bytes, Some(requested as usize));
    assert_eq!(unsafe { GDALGetCacheMax64() }, requested);
    for driver in ["GTiff", "MEM", "PNG", "JPEG"] {
        let found = DriverManager::get_driver_by_name(driver).unwrap();
        assert_eq!(found.short_name(), driver);
    }
    assert_eq!(
        gdal::config::get_config_option("GDAL_PAM_ENABLED", "YES").unwrap(),
        "NO"
    );
}
