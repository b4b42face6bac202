use image::imageops::{self, FilterType};
use image::RgbaImage;
use minifb::{Key, Window, WindowOptions};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use super::composite::DisplaySink;
use crate::error::RenderError;

/// 描画ループ側の出力。ウィンドウが追いつかないフレームは捨てる
pub struct WindowSink {
    tx: SyncSender<RgbaImage>,
}

impl DisplaySink for WindowSink {
    fn show(&mut self, frame: &RgbaImage) -> Result<(), RenderError> {
        match self.tx.try_send(frame.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(RenderError::Display("window closed".into())),
        }
    }
}

/// minifb のウィンドウ。メインスレッドで pump する
pub struct MinifbWindow {
    window: Window,
    rx: Receiver<RgbaImage>,
    buffer: Vec<u32>,
    width: usize,
    height: usize,
}

impl MinifbWindow {
    /// ウィンドウと、描画ループに渡す sink を作る
    pub fn new(title: &str, width: usize, height: usize) -> Result<(Self, WindowSink), RenderError> {
        let window = Window::new(
            title,
            width,
            height,
            WindowOptions {
                resize: false,
                ..WindowOptions::default()
            },
        )
        .map_err(|e| RenderError::Display(e.to_string()))?;
        let (tx, rx) = mpsc::sync_channel(1);

        Ok((
            Self {
                window,
                rx,
                buffer: vec![0u32; width * height],
                width,
                height,
            },
            WindowSink { tx },
        ))
    }

    /// ウィンドウが開いているか
    pub fn is_open(&self) -> bool {
        self.window.is_open() && !self.window.is_key_down(Key::Escape)
    }

    /// 届いている最新フレームを表示し、イベントを処理する
    pub fn pump(&mut self) -> Result<bool, RenderError> {
        if let Some(frame) = self.rx.try_iter().last() {
            self.copy_frame(&frame);
        }
        self.window
            .update_with_buffer(&self.buffer, self.width, self.height)
            .map_err(|e| RenderError::Display(e.to_string()))?;
        Ok(self.is_open())
    }

    /// RGBA をウィンドウサイズに合わせて 0RGB バッファへ
    fn copy_frame(&mut self, frame: &RgbaImage) {
        let (w, h) = (self.width as u32, self.height as u32);
        let resized;
        let frame = if frame.dimensions() == (w, h) {
            frame
        } else {
            resized = imageops::resize(frame, w, h, FilterType::Triangle);
            &resized
        };
        for (dst, p) in self.buffer.iter_mut().zip(frame.pixels()) {
            *dst = ((p[0] as u32) << 16) | ((p[1] as u32) << 8) | p[2] as u32;
        }
    }
}
