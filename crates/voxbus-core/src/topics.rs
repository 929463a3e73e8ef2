//! Topic and action names with the payload keys the bus itself inspects.

pub mod topic {
    pub const AUDIO_OUTPUT: &str = "AudioOutput";
    pub const AUDIO_INPUT: &str = "AudioInput";
    pub const ALEXA_CLIENT: &str = "AlexaClient";
    pub const CUSTOM_DOMAIN: &str = "CustomDomain";
    pub const PROPERTY_MANAGER: &str = "PropertyManager";
}

pub mod action {
    pub mod audio_output {
        pub const GET_NUM_BYTES_BUFFERED: &str = "GetNumBytesBuffered";
        pub const MEDIA_STATE_CHANGED: &str = "MediaStateChanged";
    }

    pub mod audio_input {
        pub const START_AUDIO_INPUT: &str = "StartAudioInput";
        pub const STOP_AUDIO_INPUT: &str = "StopAudioInput";
    }

    pub mod alexa_client {
        pub const AUTH_STATE_CHANGED: &str = "AuthStateChanged";
        pub const CONNECTION_STATUS_CHANGED: &str = "ConnectionStatusChanged";
        pub const DIALOG_STATE_CHANGED: &str = "DialogStateChanged";
    }

    pub mod property_manager {
        pub const PROPERTY_CHANGED: &str = "PropertyChanged";
        pub const PROPERTY_STATE_CHANGED: &str = "PropertyStateChanged";
        pub const GET_PROPERTY: &str = "GetProperty";
        pub const SET_PROPERTY: &str = "SetProperty";
    }
}

pub mod key {
    pub const CHANNEL: &str = "channel";
    pub const STATE: &str = "state";
    pub const STREAM_ID: &str = "streamId";
    pub const TYPE: &str = "type";
    pub const BUFFERED_BYTES: &str = "bufferedBytes";
    pub const NAME: &str = "name";
    pub const VALUE: &str = "value";
    pub const NEW_VALUE: &str = "newValue";
    pub const SUCCESS: &str = "success";
    pub const AUTH_STATE: &str = "state";
    pub const CONNECTION_STATUS: &str = "status";
    pub const REASON: &str = "reason";
}

/// Map an audio output channel name to the audio type that gates local
/// default handling. Unknown channels map to `None`.
pub fn audio_type_for_channel(channel: &str) -> Option<&'static str> {
    match channel {
        "Alerts" => Some("ALARM"),
        "AudioPlayer" | "Spotify" => Some("MUSIC"),
        "Notifications" => Some("NOTIFICATION"),
        "SpeechSynthesizer" => Some("TTS"),
        "SystemSoundPlayer" => Some("EARCON"),
        "CommsCommunication" => Some("COMMUNICATION"),
        "CommsRingtone" => Some("RINGTONE"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_channels_map_to_types() {
        assert_eq!(audio_type_for_channel("Alerts"), Some("ALARM"));
        assert_eq!(audio_type_for_channel("AudioPlayer"), Some("MUSIC"));
        assert_eq!(audio_type_for_channel("Spotify"), Some("MUSIC"));
        assert_eq!(audio_type_for_channel("SpeechSynthesizer"), Some("TTS"));
        assert_eq!(audio_type_for_channel("CommsRingtone"), Some("RINGTONE"));
    }

    #[test]
    fn unknown_channel_has_no_type() {
        assert_eq!(audio_type_for_channel("Radio"), None);
        assert_eq!(audio_type_for_channel(""), None);
    }
}
