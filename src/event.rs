// Window events the frame loop reacts to
//
// Everything else winit reports (input, focus, scale changes...) is ignored.

use winit::event::WindowEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSignal {
    CloseRequested,
    Minimized,
    Restored,
    Resized { width: u32, height: u32 },
}

impl WindowSignal {
    /// Translate a winit event. Returns `None` for events the loop ignores.
    ///
    /// Platforms report minimize differently: a zero-area resize on Windows,
    /// occlusion on macOS and some Wayland compositors. Both map to
    /// `Minimized`.
    pub fn from_window_event(event: &WindowEvent) -> Option<Self> {
        match event {
            WindowEvent::CloseRequested => Some(Self::CloseRequested),
            WindowEvent::Resized(size) if size.width == 0 || size.height == 0 => {
                Some(Self::Minimized)
            }
            WindowEvent::Resized(size) => Some(Self::Resized {
                width: size.width,
                height: size.height,
            }),
            WindowEvent::Occluded(true) => Some(Self::Minimized),
            WindowEvent::Occluded(false) => Some(Self::Restored),
            _ => None,
        }
    }
}
