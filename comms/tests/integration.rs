use std::time::Duration;

use comms::{
    NodeIdentity, ParameterVector,
    msg::{Command, Msg, Payload},
};
use tokio::{io, io::AsyncWriteExt, time::timeout};

#[tokio::test]
async fn send_recv() {
    const SIZE: usize = 128;

    let msg = Msg::Control(Command::Hello {
        identity: NodeIdentity::new(0, 2).unwrap(),
    });

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    tx.send(&msg).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let received: Msg = rx.recv().await.unwrap();

    assert_eq!(received, msg);
}

#[tokio::test]
async fn large_parameter_frame_crosses_a_small_pipe() {
    let params = ParameterVector::new((0..10_000).map(|i| i as f32 * 0.5).collect(), 1.0);
    let msg = Msg::Data(Payload::Train {
        round: 3,
        params: params.clone(),
    });

    let (one, two) = io::duplex(64);
    let (_, tx) = io::split(one);
    let (rx, _) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tokio::io::sink());
    let (_, mut tx) = comms::channel(tokio::io::empty(), tx);

    let sender = tokio::spawn(async move { tx.send(&msg).await });

    let received: Msg = rx.recv().await.unwrap();
    sender.await.unwrap().unwrap();

    assert_eq!(received, Msg::Data(Payload::Train { round: 3, params }));
}

#[tokio::test]
async fn timed_out_recv_keeps_the_stream_aligned() {
    let (one, two) = io::duplex(256);
    let (_, mut raw_tx) = io::split(one);
    let (rx, _) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tokio::io::sink());

    let mut frame = Vec::new();
    {
        let (_, mut tx) = comms::channel(tokio::io::empty(), &mut frame);
        tx.send(&Msg::Control(Command::UpdateAck { round: 7 }))
            .await
            .unwrap();
    }

    // Half a frame, then a timeout, then the other half.
    let (head, tail) = frame.split_at(frame.len() / 2);
    raw_tx.write_all(head).await.unwrap();

    let first = timeout(Duration::from_millis(20), rx.recv::<Msg>()).await;
    assert!(first.is_err());

    raw_tx.write_all(tail).await.unwrap();
    let msg: Msg = rx.recv().await.unwrap();
    assert_eq!(msg, Msg::Control(Command::UpdateAck { round: 7 }));
}

#[tokio::test]
async fn closed_peer_is_unexpected_eof() {
    let (one, two) = io::duplex(64);
    drop(one);

    let (rx, _) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tokio::io::sink());

    let err = rx.recv::<Msg>().await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}
