//! Calibration directory inspector
//!
//! Loads the calibration for one serial number the same way the pipeline does and prints
//! what was found: global parameters, per-set leaf masks, geometry and bad pixels.
//!
//! Usage:
//!   cargo run --example cal_info -- --root ~/.thermapp/cal --serial 20150422

use clap::Parser;
use std::path::PathBuf;
use thermapp::calibration::LeafId;
use thermapp::{CalSet, Calibration, FrameHeader};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "ThermApp calibration inspector")]
struct Args {
    /// Calibration root containing one directory per serial number
    #[arg(short, long)]
    root: PathBuf,

    /// Camera serial number
    #[arg(short, long)]
    serial: u32,

    /// Focal plane array width and height
    #[arg(long, num_args = 2, default_values_t = [384, 288])]
    fpa: Vec<u16>,

    /// Readout window width and height (defaults to the full array)
    #[arg(long, num_args = 2)]
    image: Option<Vec<u16>>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let (fpa_w, fpa_h) = (args.fpa[0], args.fpa[1]);
    let (data_w, data_h) = match args.image.as_deref() {
        Some([w, h]) => (*w, *h),
        _ => (fpa_w, fpa_h),
    };

    let header = FrameHeader {
        serial_num_lo: args.serial as u16,
        serial_num_hi: (args.serial >> 16) as u16,
        fpa_w,
        fpa_h,
        data_w,
        data_h,
        ..FrameHeader::initial_config()
    };
    info!("Inspecting {}", header);

    let cal = Calibration::open(Some(&args.root), &header);

    println!("Serial:        {}", cal.serial_num());
    if cal.has_factory_params() {
        let p = cal.params();
        println!("Model:         {} / {}", p.model, p.lens);
        println!("Description:   {}", p.description);
        println!("Date:          {}", p.cal_date);
        println!("Format:        v{} (data v{})", p.ver_format, p.ver_data);
        println!("Type:          {}", p.cal_type);
        println!("Range:         {:.1} .. {:.1} °C", p.cal_temp_min, p.cal_temp_max);
        println!(
            "Thresholds:    med->lo {:.1}, lo->med {:.1}, hi->med {:.1}, med->hi {:.1}",
            p.thresholds.med_to_lo,
            p.thresholds.lo_to_med,
            p.thresholds.hi_to_med,
            p.thresholds.med_to_hi
        );
        if p.transient.is_enabled() {
            println!(
                "Transient:     {:.0} s, step {:.1} s",
                p.transient.oper_time, p.transient.step_time
            );
        }
    } else {
        println!("No factory parameters; auto-calibration only");
    }

    let g = cal.geometry();
    println!(
        "Geometry:      image {}x{} in NUC {}x{} at ({}, {})",
        g.image_w, g.image_h, g.nuc_w, g.nuc_h, g.ofs_x, g.ofs_y
    );
    println!("Bad pixels:    {}", cal.bad_pixel_count());

    println!();
    for set in CalSet::FACTORY {
        let Some(data) = cal.set(set) else {
            continue;
        };
        let present: Vec<&str> = LeafId::all()
            .filter(|leaf| data.has(leaf.bit()))
            .map(|leaf| leaf.name())
            .collect();
        println!(
            "Set {:<4} {} valid {:#010x}  [{}]",
            set.to_string(),
            if cal.can_select(set) { "usable  " } else { "partial " },
            data.valid(),
            present.join(" ")
        );
    }
    println!();
    println!("Selected:      {}", cal.current_set());
    Ok(())
}
