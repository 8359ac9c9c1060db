use std::{ffi::CString, os::raw::c_int, ptr};

use ffmpeg_next::{Dictionary, Packet, codec::Parameters, ffi};

use crate::{
    error::{RelayError, Result},
    media::{OutputHandle, OutputOptions},
    packet::RawPacket,
    rescale::Rational,
    stream::StreamDescriptor,
};

/// A muxer bound to a URL or file path.
///
/// Allocation, the transport and the header are separate steps so that a
/// failure in any of them can be unwound precisely.
pub struct AvOutput {
    address: String,
    inner: ffmpeg_next::format::context::Output,
    options: OutputOptions,
    transport_open: bool,
}

impl AvOutput {
    pub fn new(address: &str, format: Option<&str>, options: &OutputOptions) -> Result<Self> {
        let c_address = CString::new(address).map_err(|e| RelayError::open(address, e))?;
        let c_format = format
            .map(CString::new)
            .transpose()
            .map_err(|e| RelayError::open(address, e))?;

        let mut ctx = ptr::null_mut();
        let ret = unsafe {
            ffi::avformat_alloc_output_context2(
                &mut ctx,
                ptr::null(),
                c_format.as_ref().map_or(ptr::null(), |f| f.as_ptr()),
                c_address.as_ptr(),
            )
        };
        if ret < 0 || ctx.is_null() {
            return Err(RelayError::open(
                address,
                format!(
                    "cannot allocate output context (format {:?}): {}",
                    format,
                    ffmpeg_next::Error::from(ret)
                ),
            ));
        }

        Ok(Self {
            address: address.to_string(),
            inner: unsafe { ffmpeg_next::format::context::Output::wrap(ctx) },
            options: options.clone(),
            transport_open: false,
        })
    }

    pub fn format_name(&self) -> &str {
        self.inner.format().name()
    }

    fn supports_codec(&self, codec: &Parameters) -> bool {
        // 1 = supported, 0 = not supported, < 0 = the muxer cannot tell
        let ret = unsafe {
            ffi::avformat_query_codec(
                (*self.inner.as_ptr()).oformat,
                codec.id().into(),
                ffi::FF_COMPLIANCE_NORMAL as c_int,
            )
        };
        ret != 0
    }
}

impl OutputHandle for AvOutput {
    type Codec = Parameters;
    type Payload = Packet;

    fn address(&self) -> &str {
        &self.address
    }

    fn add_stream(
        &mut self,
        codec: &Parameters,
        time_base_hint: Rational,
    ) -> Result<StreamDescriptor<Parameters>> {
        let index = self.inner.nb_streams() as usize;
        if !self.supports_codec(codec) {
            return Err(RelayError::topology(
                &self.address,
                index,
                format!("{} cannot carry codec {:?}", self.format_name(), codec.id()),
            ));
        }

        let address = self.address.clone();
        let mut stream = self
            .inner
            .add_stream(ffmpeg_next::encoder::find(codec.id()))
            .map_err(|e| RelayError::topology(&address, index, e))?;
        stream.set_parameters(codec.clone());
        unsafe {
            (*(*stream.as_mut_ptr()).codecpar).codec_tag = 0;
        }
        stream.set_time_base(ffmpeg_next::Rational::from(time_base_hint));

        Ok(StreamDescriptor::new(
            stream.index(),
            codec.clone(),
            stream.time_base().into(),
        ))
    }

    fn stream_time_base(&self, index: usize) -> Option<Rational> {
        self.inner.stream(index).map(|s| s.time_base().into())
    }

    fn needs_transport(&self) -> bool {
        unsafe {
            let oformat = (*self.inner.as_ptr()).oformat;
            ((*oformat).flags & ffi::AVFMT_NOFILE as c_int) == 0
        }
    }

    fn open_transport(&mut self) -> Result<()> {
        let c_address =
            CString::new(self.address.as_str()).map_err(|e| RelayError::open(&self.address, e))?;
        let options = transport_dictionary(&self.address, &self.options);
        let ret = unsafe {
            let mut options = options.disown();
            let ret = ffi::avio_open2(
                &mut (*self.inner.as_mut_ptr()).pb,
                c_address.as_ptr(),
                ffi::AVIO_FLAG_WRITE as c_int,
                ptr::null(),
                &mut options,
            );
            // frees whatever the protocol did not consume
            drop(Dictionary::own(options));
            ret
        };
        if ret < 0 {
            return Err(RelayError::open(&self.address, ffmpeg_next::Error::from(ret)));
        }
        self.transport_open = true;
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        let options = header_dictionary(self.format_name(), &self.options);
        self.inner
            .write_header_with(options)
            .map(|_| ())
            .map_err(|e| RelayError::header(&self.address, e))
    }

    fn write_packet(&mut self, packet: RawPacket<Packet>) -> Result<()> {
        let (index, pts, dts, duration) = (
            packet.stream_index(),
            packet.pts(),
            packet.dts(),
            packet.duration(),
        );
        let mut p = packet.into_payload();
        p.set_stream(index);
        p.set_pts(pts);
        p.set_dts(dts);
        p.set_duration(duration);
        p.set_position(-1);
        p.write_interleaved(&mut self.inner)
            .map_err(|e| RelayError::write(&self.address, e))
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.inner
            .write_trailer()
            .map_err(|e| RelayError::trailer(&self.address, e))
    }

    fn close_transport(&mut self) {
        if self.transport_open {
            self.transport_open = false;
            unsafe {
                ffi::avio_closep(&mut (*self.inner.as_mut_ptr()).pb);
            }
        }
    }
}

impl Drop for AvOutput {
    fn drop(&mut self) {
        self.close_transport();
    }
}

/// Protocol options for `avio_open2`. Times are in microseconds.
fn transport_dictionary(address: &str, options: &OutputOptions) -> Dictionary<'static> {
    let mut dict = Dictionary::new();
    if address.contains("://") {
        dict.set("rw_timeout", &options.timeout.as_micros().to_string());
    }
    dict
}

/// Muxer options for the header. The rtsp muxer opens its own connection,
/// so the I/O timeout goes here instead of through `avio_open2`.
fn header_dictionary(format_name: &str, options: &OutputOptions) -> Dictionary<'static> {
    let mut dict = Dictionary::new();
    if format_name == "rtsp" {
        dict.set("rtsp_transport", options.transport.as_str());
        dict.set("timeout", &options.timeout.as_micros().to_string());
    }
    dict
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::media::Transport;

    #[test]
    fn test_rtsp_header_dictionary() {
        let options = OutputOptions {
            transport: Transport::Udp,
            timeout: Duration::from_secs(2),
        };
        let dict = header_dictionary("rtsp", &options);
        assert_eq!(dict.get("rtsp_transport"), Some("udp"));
        assert_eq!(dict.get("timeout"), Some("2000000"));
    }

    #[test]
    fn test_file_header_dictionary() {
        let dict = header_dictionary("matroska", &OutputOptions::default());
        assert_eq!(dict.get("rtsp_transport"), None);
        assert_eq!(dict.get("timeout"), None);
    }

    #[test]
    fn test_transport_dictionary() {
        let options = OutputOptions::default();
        let dict = transport_dictionary("rtmp://host/app/key", &options);
        assert_eq!(dict.get("rw_timeout"), Some("5000000"));

        let dict = transport_dictionary("/tmp/out.mkv", &options);
        assert_eq!(dict.get("rw_timeout"), None);
    }
}
