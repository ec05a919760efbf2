mod state;

use super::image_loader::Image;
use state::{PointMode, RunMode, UiState};

use egui::{
    CentralPanel, Color32, ColorImage, Pos2, ProgressBar, Rect, Sense, SidePanel, Stroke,
    TextureOptions, TopBottomPanel,
};
use stepsam::model::OnnxExecutor;
use stepsam::{Annotation, SamPipeline, Step};
use strum::IntoEnumIterator;
use tracing::{error, info, warn};

const MASK_COLOR: [u8; 3] = [255, 0, 0];
const MASK_ALPHA: f32 = 0.5;

pub struct UiData {
    pipeline: SamPipeline<OnnxExecutor>,

    state: UiState,
}

impl eframe::App for UiData {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // at most one step budget per frame
        self.step_segmentation();

        self.draw_info_column(ctx);

        self.draw_button_row(ctx);

        self.draw_img_area(ctx);

        if self.pipeline.is_busy() {
            ctx.request_repaint();
        }
    }
}

impl UiData {
    pub fn new(pipeline: SamPipeline<OnnxExecutor>) -> Self {
        UiData {
            pipeline,

            state: UiState::new(),
        }
    }

    pub fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        eframe::run_native(
            "stepsam",
            eframe::NativeOptions {
                viewport: egui::ViewportBuilder {
                    position: None,
                    inner_size: Some(egui::vec2(1280.0, 800.0)),
                    ..Default::default()
                },
                ..Default::default()
            },
            Box::new(move |_cc| Ok(Box::new(self))),
        )?;
        Ok(())
    }
}

// private
impl UiData {
    fn draw_info_column(&self, ctx: &egui::Context) {
        SidePanel::right("infos").show(ctx, |ui| {
            ui.vertical(|ui| {
                ui.label("Image Info");
                match &self.state.img {
                    Some(img) => {
                        ui.label(format!("Width: {}", img.data.width()));
                        ui.label(format!("Height: {}", img.data.height()));
                        ui.label(format!("File size: {} KiB", img.file_size / 1024));
                    }
                    None => {
                        ui.label("No Image loaded");
                    }
                }

                ui.separator();
                ui.label("Model");
                ui.label(format!(
                    "Encoder: {} steps, {} per frame",
                    self.pipeline.encoder().step_count(),
                    self.pipeline.encoder().step_budget()
                ));
                ui.label(format!(
                    "Decoder: {} steps, {} per frame",
                    self.pipeline.decoder().step_count(),
                    self.pipeline.decoder().step_budget()
                ));

                if let Some(mask) = &self.state.mask {
                    ui.separator();
                    ui.label(format!("Mask area: {} px", mask.area()));
                }
            });
        });
    }

    fn draw_button_row(&mut self, ctx: &egui::Context) {
        TopBottomPanel::top("Button Area").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui.button("Read Image").clicked() {
                    self.read_image();
                }
                if ui
                    .add_enabled(self.state.mask.is_some(), egui::Button::new("Save Mask"))
                    .clicked()
                {
                    self.save_mask();
                }
                if ui
                    .add_enabled(self.pipeline.is_busy(), egui::Button::new("Cancel"))
                    .clicked()
                {
                    self.pipeline.cancel();
                    self.state.progress = None;
                }

                ui.separator();

                ui.label("Point: ");
                for variant in PointMode::iter() {
                    ui.radio_value(&mut self.state.point_mode, variant, variant.to_string());
                }

                ui.separator();

                ui.label("Run: ");
                for variant in RunMode::iter() {
                    ui.radio_value(&mut self.state.run_mode, variant, variant.to_string());
                }

                if let Some(progress) = self.state.progress {
                    ui.separator();
                    ui.add(
                        ProgressBar::new(progress.fraction())
                            .desired_width(160.0)
                            .text(format!("{} {}/{}", progress.stage, progress.executed, progress.total)),
                    );
                }
            });
        });
    }

    fn draw_img_area(&mut self, ctx: &egui::Context) {
        self.ensure_texture(ctx);

        CentralPanel::default().show(ctx, |ui| {
            let (Some(texture), Some(img)) = (&self.state.texture, &self.state.img) else {
                ui.label(&self.state.img_label);
                return;
            };
            let size = [img.data.width() as f32, img.data.height() as f32];

            let response = ui.image(texture).interact(Sense::click_and_drag());
            let rect = response.rect;
            let pointer = response.interact_pointer_pos();

            if response.drag_started() {
                if let Some(pos) = pointer {
                    self.state.selector.press(Self::to_image(pos, rect, size));
                    self.state.drag_start = Some(pos);
                    self.state.drag_end = Some(pos);
                }
            } else if response.dragged() {
                self.state.drag_end = pointer.or(self.state.drag_end);
            } else if response.drag_stopped() {
                let end = pointer.or(self.state.drag_end);
                self.state.drag_start = None;
                self.state.drag_end = None;
                if let Some(pos) = end {
                    let inside = self.state.point_mode == PointMode::Foreground;
                    self.state.pending = self
                        .state
                        .selector
                        .release(Self::to_image(pos, rect, size), inside);
                }
            } else if response.clicked() {
                if let Some(pos) = pointer {
                    let pos = Self::to_image(pos, rect, size);
                    let inside = self.state.point_mode == PointMode::Foreground;
                    self.state.selector.press(pos);
                    self.state.pending = self.state.selector.release(pos, inside);
                }
            }

            if let (Some(a), Some(b)) = (self.state.drag_start, self.state.drag_end) {
                ui.painter().rect_stroke(
                    Rect::from_two_pos(a, b),
                    1.0,
                    Stroke::new(2.0, Color32::RED),
                );
            }
        });

        if let Some(annotation) = self.state.pending.take() {
            self.segment(annotation);
        }
    }

    fn ensure_texture(&mut self, ctx: &egui::Context) {
        if self.state.texture.is_some() {
            return;
        }
        let Some(img) = &self.state.img else {
            return;
        };

        let rgb = img.data.to_rgb8();
        let shown = match &self.state.mask {
            Some(mask) => stepsam::utils::overlay(&rgb, mask, MASK_COLOR, MASK_ALPHA),
            None => rgb,
        };
        let size = [shown.width() as usize, shown.height() as usize];
        let color_image = ColorImage::from_rgb(size, shown.as_raw());
        self.state.texture = Some(ctx.load_texture("image", color_image, TextureOptions::default()));
    }

    // screen position to image pixel coordinates
    fn to_image(pos: Pos2, rect: Rect, size: [f32; 2]) -> [f32; 2] {
        [
            (pos.x - rect.min.x) / rect.width() * size[0],
            (pos.y - rect.min.y) / rect.height() * size[1],
        ]
    }
}

// private, pipeline related
impl UiData {
    fn read_image(&mut self) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("image", &["png", "jpg", "jpeg", "bmp"])
            .pick_file()
        else {
            return;
        };

        self.pipeline.cancel();
        match Image::load(path) {
            Ok(img) => self.state.set_image(img),
            Err(e) => {
                error!(%e, "failed to load image");
                self.state.img_label = format!("Failed to load image: {e}");
            }
        }
    }

    fn save_mask(&self) {
        let Some(mask) = &self.state.mask else {
            return;
        };
        let Some(path) = rfd::FileDialog::new()
            .add_filter("png", &["png"])
            .set_file_name("mask.png")
            .save_file()
        else {
            return;
        };

        match mask.to_image().save(&path) {
            Ok(()) => info!(path = %path.display(), "mask saved"),
            Err(e) => error!(%e, "failed to save mask"),
        }
    }

    fn segment(&mut self, annotation: Annotation) {
        let Some(img) = &self.state.img else {
            return;
        };
        info!(?annotation, "segmenting");

        if self.pipeline.is_busy() {
            warn!("new prompt replaces the running segmentation");
            self.pipeline.cancel();
        }

        match self.state.run_mode {
            RunMode::Blocking => match self.pipeline.segment_blocking(&img.data, &annotation) {
                Ok(mask) => self.state.set_mask(mask),
                Err(e) => error!(%e, "segmentation failed"),
            },
            RunMode::Incremental => {
                if let Err(e) = self.pipeline.begin(&img.data, &annotation) {
                    error!(%e, "failed to start segmentation");
                }
            }
        }
    }

    fn step_segmentation(&mut self) {
        if !self.pipeline.is_busy() {
            return;
        }

        match self.pipeline.poll() {
            Ok(Step::Progress(progress)) => self.state.progress = Some(progress),
            Ok(Step::Done(mask)) => {
                info!(area = mask.area(), "mask ready");
                self.state.set_mask(mask);
            }
            Err(e) => {
                error!(%e, "segmentation failed");
                self.state.progress = None;
            }
        }
    }
}
