use session::{ConnectionState, DetectionBox, EventStream, SessionEvent};
use std::io::{self, Write};

pub fn status_line(state: ConnectionState, error: Option<&str>) -> String {
    match (state, error) {
        (ConnectionState::Connecting, _) => "Connecting...".to_string(),
        (ConnectionState::Connected, _) => "Connected".to_string(),
        (ConnectionState::Reconnecting, Some(cause)) => format!("Reconnecting... ({cause})"),
        (ConnectionState::Reconnecting, None) => "Reconnecting...".to_string(),
        (ConnectionState::Disconnected, _) => "Disconnected".to_string(),
    }
}

/// `X: 120, Y: 340; X: 410, Y: 95`
pub fn coordinates_text(detections: &[DetectionBox]) -> String {
    detections
        .iter()
        .map(|d| format!("X: {}, Y: {}", d.center_x, d.center_y))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Renders session events as console lines.
pub struct ConsolePresenter<W: Write> {
    out: W,
    image_size: Option<(u32, u32)>,
}

impl<W: Write> ConsolePresenter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            image_size: None,
        }
    }

    pub fn render(&mut self, event: &SessionEvent) -> io::Result<()> {
        match event {
            SessionEvent::ConnectionStatusChanged(state, error) => {
                writeln!(self.out, "[status] {}", status_line(*state, error.as_deref()))
            }
            SessionEvent::AlertRaised(detections) if detections.is_empty() => {
                writeln!(self.out, "[ALERT] {}", session::notify::ALERT_TITLE)
            }
            SessionEvent::AlertRaised(detections) => writeln!(
                self.out,
                "[ALERT] {} at {}",
                session::notify::ALERT_TITLE,
                coordinates_text(detections)
            ),
            SessionEvent::AlertCleared => writeln!(self.out, "[alert] dismissed"),
            SessionEvent::ImageUpdated(image) => {
                // Frames arrive continuously; only report a change of geometry.
                let size = (image.width(), image.height());
                if self.image_size == Some(size) {
                    return Ok(());
                }
                self.image_size = Some(size);
                writeln!(self.out, "[image] {}x{}", size.0, size.1)
            }
        }
    }

    pub async fn run(mut self, mut events: EventStream) -> io::Result<()> {
        while let Some(event) = events.recv().await {
            self.render(&event)?;
            self.out.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageFormat};
    use session::ImagePipeline;
    use std::io::Cursor;

    fn rendered(events: &[SessionEvent]) -> String {
        let mut presenter = ConsolePresenter::new(Vec::new());
        for event in events {
            presenter.render(event).unwrap();
        }
        String::from_utf8(presenter.out).unwrap()
    }

    #[test]
    fn status_lines() {
        assert_eq!(status_line(ConnectionState::Connecting, None), "Connecting...");
        assert_eq!(status_line(ConnectionState::Connected, None), "Connected");
        assert_eq!(
            status_line(ConnectionState::Reconnecting, Some("Connection failed: refused")),
            "Reconnecting... (Connection failed: refused)"
        );
        assert_eq!(status_line(ConnectionState::Reconnecting, None), "Reconnecting...");
        assert_eq!(status_line(ConnectionState::Disconnected, None), "Disconnected");
    }

    #[test]
    fn coordinates_are_joined() {
        assert_eq!(coordinates_text(&[]), "");
        assert_eq!(coordinates_text(&[DetectionBox::new(120, 340)]), "X: 120, Y: 340");
        assert_eq!(
            coordinates_text(&[DetectionBox::new(1, 2), DetectionBox::new(-3, 4)]),
            "X: 1, Y: 2; X: -3, Y: 4"
        );
    }

    #[test]
    fn alert_lines() {
        let out = rendered(&[
            SessionEvent::AlertRaised(vec![DetectionBox::new(5, 6)]),
            SessionEvent::AlertCleared,
            SessionEvent::AlertRaised(Vec::new()),
        ]);

        assert_eq!(
            out,
            "[ALERT] ALERT - PERSON DROWNING at X: 5, Y: 6\n\
             [alert] dismissed\n\
             [ALERT] ALERT - PERSON DROWNING\n"
        );
    }

    #[test]
    fn image_size_reported_once_per_change() {
        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(GrayImage::new(3, 2))
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();
        let image = ImagePipeline::new().to_pixel_buffer(png.get_ref()).unwrap();

        let out = rendered(&[
            SessionEvent::ImageUpdated(image.clone()),
            SessionEvent::ImageUpdated(image),
            SessionEvent::ConnectionStatusChanged(ConnectionState::Connected, None),
        ]);

        assert_eq!(out, "[image] 3x2\n[status] Connected\n");
    }
}
