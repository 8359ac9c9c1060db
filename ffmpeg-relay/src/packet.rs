/// One compressed access unit on its way from input to output.
///
/// Timing lives in plain fields so the relay can rewrite it without
/// knowing the payload type. The payload is owned: dropping the packet
/// releases whatever buffer the backend attached to it.
#[derive(Clone, Debug)]
pub struct RawPacket<P> {
    stream_index: usize,
    pts: Option<i64>,
    dts: Option<i64>,
    duration: i64,
    payload: P,
}

impl<P> RawPacket<P> {
    pub fn new(stream_index: usize, payload: P) -> Self {
        Self {
            stream_index,
            pts: None,
            dts: None,
            duration: 0,
            payload,
        }
    }

    pub fn with_timing(mut self, pts: Option<i64>, dts: Option<i64>, duration: i64) -> Self {
        self.pts = pts;
        self.dts = dts;
        self.duration = duration;
        self
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn set_stream_index(&mut self, index: usize) {
        self.stream_index = index;
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        self.pts = pts;
    }

    pub fn dts(&self) -> Option<i64> {
        self.dts
    }

    pub fn set_dts(&mut self, dts: Option<i64>) {
        self.dts = dts;
    }

    /// 0 means unknown.
    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn set_duration(&mut self, duration: i64) {
        self.duration = duration;
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}
