use crate::image_pipeline::PixelBuffer;
use crate::types::{AlertState, ConnectionState, DetectionBox, SessionEvent, SessionFrame, TransportEvent};
use std::sync::Arc;
use url::Url;

/// Everything the session reacts to, in arrival order.
#[derive(Debug, Clone)]
pub enum SessionInput {
    Connection {
        state: ConnectionState,
        error: Option<String>,
    },
    Frame(SessionFrame),
    Dismiss,
}

impl From<TransportEvent> for SessionInput {
    fn from(event: TransportEvent) -> Self {
        match event {
            TransportEvent::Status { state, error } => SessionInput::Connection { state, error },
            TransportEvent::Frame(frame) => SessionInput::Frame(frame),
        }
    }
}

/// Aggregate state of one client-to-server relationship.
///
/// Only [`Session::apply`] mutates it; every call finishes its transition
/// before returning the events that describe it.
#[derive(Debug, Clone)]
pub struct Session {
    server_url: Option<Url>,
    connection: ConnectionState,
    last_error: Option<String>,
    alert: AlertState,
    last_image: Option<Arc<PixelBuffer>>,
    last_status_text: Option<String>,
}

impl Session {
    pub fn new(server_url: Option<Url>) -> Self {
        Self {
            server_url,
            connection: ConnectionState::Disconnected,
            last_error: None,
            alert: AlertState::Idle,
            last_image: None,
            last_status_text: None,
        }
    }

    pub fn server_url(&self) -> Option<&Url> {
        self.server_url.as_ref()
    }

    pub fn set_server_url(&mut self, url: Option<Url>) {
        self.server_url = url;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn alert_state(&self) -> &AlertState {
        &self.alert
    }

    pub fn is_alerting(&self) -> bool {
        self.alert.is_alerting()
    }

    /// Detections held by the active alert, empty when not alerting.
    pub fn alert_detections(&self) -> &[DetectionBox] {
        match &self.alert {
            AlertState::Alerting { detections, .. } => detections,
            _ => &[],
        }
    }

    pub fn last_image(&self) -> Option<&Arc<PixelBuffer>> {
        self.last_image.as_ref()
    }

    pub fn last_status_text(&self) -> Option<&str> {
        self.last_status_text.as_deref()
    }

    pub fn apply(&mut self, input: SessionInput) -> Vec<SessionEvent> {
        match input {
            SessionInput::Connection { state, error } => self.on_connection(state, error),
            SessionInput::Frame(frame) => self.on_frame(frame),
            SessionInput::Dismiss => self.dismiss(),
        }
    }

    fn on_connection(&mut self, state: ConnectionState, error: Option<String>) -> Vec<SessionEvent> {
        self.connection = state;
        self.last_error = error.clone();
        vec![SessionEvent::ConnectionStatusChanged(state, error)]
    }

    fn on_frame(&mut self, frame: SessionFrame) -> Vec<SessionEvent> {
        let mut events = Vec::with_capacity(2);
        let alerting_frame = frame.is_alerting();

        if frame.status_text.is_some() {
            self.last_status_text = frame.status_text;
        }

        if alerting_frame {
            match &mut self.alert {
                AlertState::Alerting { detections, image } => {
                    // Already alerting: refresh silently, never re-notify.
                    *detections = frame.detections;
                    if frame.image.is_some() {
                        *image = frame.image.clone();
                    }
                }
                AlertState::Idle | AlertState::Dismissed => {
                    tracing::warn!(
                        detections = frame.detections.len(),
                        "Drowning detected, raising alert"
                    );
                    events.push(SessionEvent::AlertRaised(frame.detections.clone()));
                    self.alert = AlertState::Alerting {
                        detections: frame.detections,
                        image: frame.image.clone(),
                    };
                }
            }
        }

        // Frames without detections never clear an alert: only dismiss() does.
        if let Some(image) = frame.image {
            self.last_image = Some(Arc::clone(&image));
            events.push(SessionEvent::ImageUpdated(image));
        }

        events
    }

    fn dismiss(&mut self) -> Vec<SessionEvent> {
        if !self.alert.is_alerting() {
            tracing::debug!(state = self.alert.name(), "Dismiss ignored, no active alert");
            return Vec::new();
        }

        self.alert = AlertState::Dismissed;
        tracing::info!("Alert dismissed by user");
        self.alert = AlertState::Idle;

        vec![SessionEvent::AlertCleared]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection_frame(boxes: &[(i32, i32)]) -> SessionInput {
        SessionInput::Frame(SessionFrame {
            drowning_detected: true,
            detections: boxes.iter().map(|&(x, y)| DetectionBox::new(x, y)).collect(),
            ..SessionFrame::default()
        })
    }

    fn quiet_frame() -> SessionInput {
        SessionInput::Frame(SessionFrame::default())
    }

    fn image(width: u32, height: u32) -> Arc<PixelBuffer> {
        use image::{DynamicImage, ImageFormat, RgbImage};
        let mut png = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();
        crate::image_pipeline::ImagePipeline::new()
            .to_pixel_buffer(png.get_ref())
            .unwrap()
    }

    fn count_raised(events: &[SessionEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, SessionEvent::AlertRaised(_)))
            .count()
    }

    // ========== Initial State Tests ==========

    #[test]
    fn new_session_is_idle_and_disconnected() {
        let session = Session::new(None);
        assert!(matches!(session.alert_state(), AlertState::Idle));
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert!(session.last_image().is_none());
        assert!(session.alert_detections().is_empty());
    }

    // ========== Connection Status Tests ==========

    #[test]
    fn connection_status_is_reemitted() {
        let mut session = Session::new(None);
        let events = session.apply(SessionInput::Connection {
            state: ConnectionState::Reconnecting,
            error: Some("Connection failed: refused".to_string()),
        });

        assert_eq!(session.connection_state(), ConnectionState::Reconnecting);
        assert_eq!(session.last_error(), Some("Connection failed: refused"));
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::ConnectionStatusChanged(ConnectionState::Reconnecting, Some(_))]
        ));
    }

    #[test]
    fn connection_status_does_not_touch_alert() {
        let mut session = Session::new(None);
        session.apply(detection_frame(&[(1, 2)]));

        session.apply(SessionInput::Connection {
            state: ConnectionState::Reconnecting,
            error: Some("reset".to_string()),
        });

        assert!(session.is_alerting());
    }

    // ========== Alert Raising ==========

    #[test]
    fn detection_raises_alert_once() {
        let mut session = Session::new(None);

        let events = session.apply(detection_frame(&[(100, 200)]));
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::AlertRaised(boxes)] if boxes == &vec![DetectionBox::new(100, 200)]
        ));
        assert!(session.is_alerting());

        for _ in 0..5 {
            let events = session.apply(detection_frame(&[(100, 201)]));
            assert_eq!(count_raised(&events), 0, "Repeated detections must not re-alert");
        }
    }

    #[test]
    fn repeated_detection_updates_stored_boxes() {
        let mut session = Session::new(None);
        session.apply(detection_frame(&[(1, 1)]));
        session.apply(detection_frame(&[(5, 5), (6, 6)]));

        assert_eq!(
            session.alert_detections(),
            &[DetectionBox::new(5, 5), DetectionBox::new(6, 6)]
        );
    }

    #[test]
    fn flag_without_boxes_does_not_alert() {
        let mut session = Session::new(None);
        let events = session.apply(detection_frame(&[]));

        assert!(events.is_empty());
        assert!(!session.is_alerting());
    }

    #[test]
    fn boxes_without_flag_do_not_alert() {
        let mut session = Session::new(None);
        let events = session.apply(SessionInput::Frame(SessionFrame {
            drowning_detected: false,
            detections: vec![DetectionBox::new(1, 1)],
            ..SessionFrame::default()
        }));

        assert!(events.is_empty());
        assert!(!session.is_alerting());
    }

    #[test]
    fn alert_raised_precedes_image_update() {
        let mut session = Session::new(None);
        let events = session.apply(SessionInput::Frame(SessionFrame {
            drowning_detected: true,
            detections: vec![DetectionBox::new(3, 4)],
            image: Some(image(2, 2)),
            ..SessionFrame::default()
        }));

        assert!(matches!(
            events.as_slice(),
            [SessionEvent::AlertRaised(_), SessionEvent::ImageUpdated(_)]
        ));
    }

    // ========== Alerts Never Auto-Clear ==========

    #[test]
    fn quiet_frames_keep_alert() {
        let mut session = Session::new(None);
        session.apply(detection_frame(&[(10, 10)]));

        for _ in 0..20 {
            let events = session.apply(quiet_frame());
            assert!(events.is_empty());
        }

        assert!(session.is_alerting());
        assert_eq!(session.alert_detections(), &[DetectionBox::new(10, 10)]);
    }

    // ========== Dismissal ==========

    #[test]
    fn dismiss_clears_alert_exactly_once() {
        let mut session = Session::new(None);
        session.apply(detection_frame(&[(1, 1)]));
        for _ in 0..7 {
            session.apply(detection_frame(&[(2, 2)]));
            session.apply(quiet_frame());
        }

        let events = session.apply(SessionInput::Dismiss);
        assert!(matches!(events.as_slice(), [SessionEvent::AlertCleared]));
        assert!(matches!(session.alert_state(), AlertState::Idle));
        assert!(session.alert_detections().is_empty());

        let events = session.apply(SessionInput::Dismiss);
        assert!(events.is_empty(), "Second dismiss is a no-op");
    }

    #[test]
    fn dismiss_when_idle_is_noop() {
        let mut session = Session::new(None);
        assert!(session.apply(SessionInput::Dismiss).is_empty());
        assert!(matches!(session.alert_state(), AlertState::Idle));
    }

    #[test]
    fn detection_after_dismiss_raises_again() {
        let mut session = Session::new(None);
        session.apply(detection_frame(&[(1, 1)]));
        session.apply(SessionInput::Dismiss);

        let events = session.apply(detection_frame(&[(9, 9)]));
        assert_eq!(count_raised(&events), 1);
        assert!(session.is_alerting());
    }

    // ========== Images ==========

    #[test]
    fn image_only_frame_updates_image_in_any_state() {
        let mut session = Session::new(None);

        let events = session.apply(SessionInput::Frame(SessionFrame {
            image: Some(image(4, 3)),
            ..SessionFrame::default()
        }));
        assert!(matches!(events.as_slice(), [SessionEvent::ImageUpdated(_)]));
        assert_eq!(session.last_image().map(|b| b.width()), Some(4));

        session.apply(detection_frame(&[(1, 1)]));
        let events = session.apply(SessionInput::Frame(SessionFrame {
            image: Some(image(5, 3)),
            ..SessionFrame::default()
        }));
        assert!(matches!(events.as_slice(), [SessionEvent::ImageUpdated(_)]));
        assert_eq!(session.last_image().map(|b| b.width()), Some(5));
    }

    #[test]
    fn newer_image_replaces_older() {
        let mut session = Session::new(None);
        let first = image(2, 2);
        let second = image(3, 3);

        session.apply(SessionInput::Frame(SessionFrame {
            image: Some(Arc::clone(&first)),
            ..SessionFrame::default()
        }));
        session.apply(SessionInput::Frame(SessionFrame {
            image: Some(Arc::clone(&second)),
            ..SessionFrame::default()
        }));

        assert!(Arc::ptr_eq(session.last_image().unwrap(), &second));
        // Session no longer holds the superseded buffer.
        assert_eq!(Arc::strong_count(&first), 1);
    }

    #[test]
    fn alert_keeps_triggering_image_through_quiet_frames() {
        let mut session = Session::new(None);
        let trigger = image(2, 2);
        session.apply(SessionInput::Frame(SessionFrame {
            drowning_detected: true,
            detections: vec![DetectionBox::new(1, 1)],
            image: Some(Arc::clone(&trigger)),
            ..SessionFrame::default()
        }));
        session.apply(SessionInput::Frame(SessionFrame {
            image: Some(image(3, 3)),
            ..SessionFrame::default()
        }));

        match session.alert_state() {
            AlertState::Alerting { image: Some(held), .. } => assert!(Arc::ptr_eq(held, &trigger)),
            other => panic!("Expected alerting with image, got {:?}", other),
        }
    }

    #[test]
    fn status_text_is_remembered() {
        let mut session = Session::new(None);
        session.apply(SessionInput::Frame(SessionFrame {
            status_text: Some("complete".to_string()),
            ..SessionFrame::default()
        }));
        session.apply(quiet_frame());

        assert_eq!(session.last_status_text(), Some("complete"));
    }
}
