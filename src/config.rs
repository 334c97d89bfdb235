use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use pcap_bus::{
    ConverterConfig, ProcessDecoder,
    decoder::{DEFAULT_DECODER_PROGRAM, DEFAULT_MAX_LINE_LENGTH},
    dispatch::DEFAULT_MAX_CONCURRENT_DECODERS,
};

/// Convert pcap captures into decoded JSON records, one per line on stdout.
#[derive(Parser, Debug)]
#[command(name = "pcap-tshark", version, about, long_about = None)]
pub struct Args {
    /// Capture file, directory of `.pcap` files, or `-` for standard input
    #[arg(env = "PCAP_TSHARK_INPUT", default_value = "-")]
    pub input: PathBuf,

    /// Directory for segment files (default: system temp dir)
    #[arg(long, env = "PCAP_TSHARK_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Packets buffered before new ones are dropped; 0 = unbounded
    #[arg(long, env = "PCAP_TSHARK_MAX_PACKET_QUEUE_SIZE", default_value_t = 0)]
    pub max_packet_queue_size: usize,

    /// Decoder processes allowed to run at once
    #[arg(long, env = "PCAP_TSHARK_CONCURRENCY", default_value_t = DEFAULT_MAX_CONCURRENT_DECODERS)]
    pub concurrency: usize,

    /// Decoder program, invoked as `<decoder> [decoder-arg...] --infile <segment>`
    #[arg(long, env = "PCAP_TSHARK_DECODER", default_value = DEFAULT_DECODER_PROGRAM)]
    pub decoder: PathBuf,

    /// Extra decoder argument, repeatable
    #[arg(
        long = "decoder-arg",
        env = "PCAP_TSHARK_DECODER_ARGS",
        value_delimiter = ',',
        allow_hyphen_values = true
    )]
    pub decoder_args: Vec<String>,

    /// Longest decoder output line kept, in bytes
    #[arg(long, env = "PCAP_TSHARK_MAX_LINE_LENGTH", default_value_t = DEFAULT_MAX_LINE_LENGTH)]
    pub max_line_length: usize,

    /// Serve `GET /metrics` on this address
    #[arg(long, env = "PCAP_TSHARK_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Stdin,
    Path(PathBuf),
}

impl Args {
    pub fn input(&self) -> Input {
        if self.input.as_os_str() == "-" {
            Input::Stdin
        } else {
            Input::Path(self.input.clone())
        }
    }

    pub fn converter_config(&self) -> ConverterConfig {
        let mut builder = ConverterConfig::builder()
            .max_packet_queue_size(self.max_packet_queue_size)
            .max_concurrent_decoders(self.concurrency);
        if let Some(dir) = &self.temp_dir {
            builder = builder.temp_dir(dir);
        }
        builder.build()
    }

    pub fn decoder(&self) -> ProcessDecoder {
        ProcessDecoder::new(&self.decoder)
            .with_args(self.decoder_args.iter())
            .with_max_line_length(self.max_line_length)
    }
}
