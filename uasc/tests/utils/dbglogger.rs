use log::{Log, Metadata, Record, LevelFilter};
struct L;
impl Log for L {
    fn enabled(&self, _m: &Metadata) -> bool { true }
    fn log(&self, r: &Record) { eprintln!("[{}] {}: {}", r.level(), r.target(), r.args()); }
    fn flush(&self) {}
}
static LOGGER: L = L;
pub fn init() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Trace);
}
