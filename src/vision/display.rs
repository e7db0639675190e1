use super::{to_point, to_rect};
use crate::pipeline::{Overlay, Viewer};
use anyhow::{Context, Result};
use opencv::{
    core::{self, Mat, Scalar},
    highgui, imgproc,
};

const KEY_ESC: i32 = 27;
const KEY_Q: i32 = 113;

/// highgui preview window.
pub struct Window {
    name: String,
}

impl Window {
    pub fn open(name: &str) -> Result<Self> {
        highgui::named_window(name, highgui::WINDOW_AUTOSIZE)
            .context("Failed to open display window")?;
        Ok(Self {
            name: name.to_string(),
        })
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        let _ = highgui::destroy_window(&self.name);
    }
}

fn label(frame: &mut Mat, text: &str, origin: core::Point, color: Scalar) -> Result<()> {
    imgproc::put_text(
        frame,
        text,
        origin,
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        color,
        1,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

impl Viewer<Mat> for Window {
    fn show(&mut self, frame: &mut Mat, overlay: &Overlay<'_>) -> Result<bool> {
        let green = Scalar::new(0.0, 255.0, 0.0, 0.0);
        let red = Scalar::new(0.0, 0.0, 255.0, 0.0);
        let blue = Scalar::new(255.0, 0.0, 0.0, 0.0);

        for port in overlay.ports {
            let center = to_point(port.center);
            imgproc::circle(frame, center, 30, red, 2, imgproc::LINE_8, 0)?;
            label(frame, &format!("Bee ID={}", port.id), center, red)?;
        }
        for region in overlay.regions {
            imgproc::rectangle(frame, to_rect(*region.bbox()), green, 2, imgproc::LINE_8, 0)?;
        }
        for (id, bbox) in overlay.trackers {
            imgproc::rectangle(frame, to_rect(*bbox), blue, 2, imgproc::LINE_8, 0)?;
            let origin = core::Point::new(bbox.x, bbox.y.saturating_sub(6));
            label(frame, &format!("ID {}", id), origin, blue)?;
        }
        label(
            frame,
            &format!("Frame {}", overlay.frame_index),
            core::Point::new(10, 24),
            green,
        )?;

        highgui::imshow(&self.name, &*frame)?;
        let key = highgui::wait_key(1)?;
        Ok(key == KEY_ESC || key == KEY_Q)
    }
}
