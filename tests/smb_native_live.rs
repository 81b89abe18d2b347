#[cfg(feature = "smb-native")]
mod smb_native_live_tests {
    use chrono::FixedOffset;
    use smbshare::protocols::smb::{
        server::smb_rs_factory, AuthStrategy, Backend, HostConnection, ServerFacade, System,
        TimeZoneProvider,
    };
    use std::io::Cursor;

    // REQUIRES: Docker container running samba on the default port
    // docker run -d -p 445:445 -e USERNAME=test -e PASSWORD=test dperson/samba -s "public;/share;yes;no;no;test"

    #[test]
    #[ignore]
    fn test_native_write_list_read() {
        let host = HostConnection::new("localhost", AuthStrategy::basic("test", "", "test"));
        let facade = ServerFacade::new(
            host,
            System::default(),
            TimeZoneProvider::fixed(FixedOffset::east_opt(0).unwrap()),
            Some(smb_rs_factory()),
            true,
        )
        .expect("no backend");
        assert_eq!(facade.backend(), Backend::Native);

        let mut share = facade.get_share("public").expect("Failed to connect");

        // 1. Write
        let content = b"smbshare native test";
        let mut source = Cursor::new(content.to_vec());
        share
            .upload(&mut source, "/native_test.txt")
            .expect("Write failed");

        // 2. List
        let entries = share.list("/").expect("List failed");
        assert!(
            entries.iter().any(|entry| entry.name == "native_test.txt"),
            "uploaded file not listed"
        );

        // 3. Read back
        let mut sink = Vec::new();
        share
            .download("/native_test.txt", &mut sink)
            .expect("Read failed");
        assert_eq!(sink, content);
    }
}
