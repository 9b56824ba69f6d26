// Copyright 2026 Calltrace Project Authors. Licensed under Apache-2.0.

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        Config(key: &'static str, value: String) {
            display("invalid value {:?} for setting {}, keeping default", value, key)
        }
        Logic(what: String) {
            display("instrumentation logic error: {}", what)
        }
        Io(err: std::io::Error) {
            from()
            source(err)
            display("report output failed: {}", err)
        }
        Json(err: serde_json::Error) {
            from()
            source(err)
            display("report serialization failed: {}", err)
        }
        HashCollision(hash: u64) {
            display("distinct labels share hash {:#018x}", hash)
        }
        MergeExhausted {
            display("out of memory while merging thread graphs")
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
